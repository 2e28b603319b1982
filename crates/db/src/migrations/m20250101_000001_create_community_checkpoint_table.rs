//! Create community checkpoint table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CommunityCheckpoint::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CommunityCheckpoint::Community)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CommunityCheckpoint::LastEntryAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommunityCheckpoint::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CommunityCheckpoint::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum CommunityCheckpoint {
    Table,
    Community,
    LastEntryAt,
    UpdatedAt,
}
