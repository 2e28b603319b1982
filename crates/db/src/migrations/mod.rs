//! Database migrations.
//!
//! Schema migrations for the bot state database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_community_checkpoint_table;
mod m20250101_000002_create_propagation_failure_table;
mod m20250101_000003_create_evidence_report_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_community_checkpoint_table::Migration),
            Box::new(m20250101_000002_create_propagation_failure_table::Migration),
            Box::new(m20250101_000003_create_evidence_report_table::Migration),
        ]
    }
}
