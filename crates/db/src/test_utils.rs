//! Test utilities for database operations.
//!
//! Connects to a disposable `PostgreSQL` database, migrates it and hands out
//! repositories over the shared connection.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use tracing::info;

use crate::repositories::{
    CheckpointRepository, EvidenceReportRepository, PropagationFailureRepository,
};

/// Tables holding bot state, emptied between tests.
const STATE_TABLES: [&str; 3] = ["community_checkpoint", "propagation_failure", "evidence_report"];

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "ada_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD").unwrap_or_else(|_| "ada_test".to_string()),
            database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "ada_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
    /// Database configuration.
    pub config: TestDbConfig,
}

impl TestDatabase {
    /// Connect with the default configuration and run migrations.
    pub async fn new() -> Result<Self, DbErr> {
        Self::with_config(TestDbConfig::default()).await
    }

    /// Connect with a custom configuration and run migrations.
    pub async fn with_config(config: TestDbConfig) -> Result<Self, DbErr> {
        use sea_orm_migration::MigratorTrait;

        let conn = Database::connect(&config.database_url()).await?;
        crate::migrations::Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Migrated test database");

        Ok(Self {
            conn: Arc::new(conn),
            config,
        })
    }

    /// Connect, migrate and empty every state table.
    pub async fn fresh() -> Result<Self, DbErr> {
        let db = Self::new().await?;
        db.cleanup().await?;
        Ok(db)
    }

    /// Checkpoint repository over this database.
    #[must_use]
    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(Arc::clone(&self.conn))
    }

    /// Retry-ledger repository over this database.
    #[must_use]
    pub fn failures(&self) -> PropagationFailureRepository {
        PropagationFailureRepository::new(Arc::clone(&self.conn))
    }

    /// Evidence repository over this database.
    #[must_use]
    pub fn evidence(&self) -> EvidenceReportRepository {
        EvidenceReportRepository::new(Arc::clone(&self.conn))
    }

    /// Remove all bot state rows.
    pub async fn cleanup(&self) -> Result<(), DbErr> {
        for table in STATE_TABLES {
            self.conn
                .execute(Statement::from_string(
                    DatabaseBackend::Postgres,
                    format!("TRUNCATE TABLE \"{table}\""),
                ))
                .await?;
        }

        info!("Cleaned up test database");
        Ok(())
    }
}
