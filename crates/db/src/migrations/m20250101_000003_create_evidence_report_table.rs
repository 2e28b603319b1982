//! Create evidence report table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EvidenceReport::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EvidenceReport::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EvidenceReport::Account)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EvidenceReport::SourceCommunity)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EvidenceReport::Moderator).string_len(64))
                    .col(ColumnDef::new(EvidenceReport::Body).text().not_null())
                    .col(
                        ColumnDef::new(EvidenceReport::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_evidence_report_account")
                    .table(EvidenceReport::Table)
                    .col(EvidenceReport::Account)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EvidenceReport::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EvidenceReport {
    Table,
    Id,
    Account,
    SourceCommunity,
    Moderator,
    Body,
    CreatedAt,
}
