//! Create propagation failure table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PropagationFailure::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PropagationFailure::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PropagationFailure::Account)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PropagationFailure::Community)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PropagationFailure::Kind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PropagationFailure::LastError).text().not_null())
                    .col(
                        ColumnDef::new(PropagationFailure::Attempts)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PropagationFailure::FirstFailedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PropagationFailure::LastFailedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (account, community) - one ledger row per target
        manager
            .create_index(
                Index::create()
                    .name("idx_propagation_failure_account_community")
                    .table(PropagationFailure::Table)
                    .col(PropagationFailure::Account)
                    .col(PropagationFailure::Community)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: kind (for listing pending retries)
        manager
            .create_index(
                Index::create()
                    .name("idx_propagation_failure_kind")
                    .table(PropagationFailure::Table)
                    .col(PropagationFailure::Kind)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PropagationFailure::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PropagationFailure {
    Table,
    Id,
    Account,
    Community,
    Kind,
    LastError,
    Attempts,
    FirstFailedAt,
    LastFailedAt,
}
