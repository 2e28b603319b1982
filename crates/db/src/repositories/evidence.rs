//! Evidence report repository.

use std::sync::Arc;

use crate::entities::{evidence_report, EvidenceReport};
use ada_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Evidence report repository for database operations.
#[derive(Clone)]
pub struct EvidenceReportRepository {
    db: Arc<DatabaseConnection>,
}

impl EvidenceReportRepository {
    /// Create a new evidence report repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Store a new report.
    pub async fn create(
        &self,
        model: evidence_report::ActiveModel,
    ) -> AppResult<evidence_report::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a report by ID.
    pub async fn get(&self, id: &str) -> AppResult<evidence_report::Model> {
        EvidenceReport::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Evidence report {id} not found")))
    }

    /// Get all reports for an account, newest first.
    pub async fn find_by_account(&self, account: &str) -> AppResult<Vec<evidence_report::Model>> {
        EvidenceReport::find()
            .filter(evidence_report::Column::Account.eq(account))
            .order_by_desc(evidence_report::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
