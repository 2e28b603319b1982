//! Propagation failure repository.

use std::sync::Arc;

use crate::entities::{
    propagation_failure::{self, FailureKind},
    PropagationFailure,
};
use ada_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Propagation failure repository for database operations.
#[derive(Clone)]
pub struct PropagationFailureRepository {
    db: Arc<DatabaseConnection>,
}

impl PropagationFailureRepository {
    /// Create a new propagation failure repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the failure row of one account and target community.
    pub async fn find_by_pair(
        &self,
        account: &str,
        community: &str,
    ) -> AppResult<Option<propagation_failure::Model>> {
        PropagationFailure::find()
            .filter(propagation_failure::Column::Account.eq(account))
            .filter(propagation_failure::Column::Community.eq(community))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new failure row.
    pub async fn create(
        &self,
        model: propagation_failure::ActiveModel,
    ) -> AppResult<propagation_failure::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update an existing failure row.
    pub async fn update(
        &self,
        model: propagation_failure::ActiveModel,
    ) -> AppResult<propagation_failure::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List failures of one kind, oldest first.
    pub async fn find_by_kind(&self, kind: FailureKind) -> AppResult<Vec<propagation_failure::Model>> {
        PropagationFailure::find()
            .filter(propagation_failure::Column::Kind.eq(kind))
            .order_by_asc(propagation_failure::Column::FirstFailedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List all failures recorded for an account.
    pub async fn find_by_account(&self, account: &str) -> AppResult<Vec<propagation_failure::Model>> {
        PropagationFailure::find()
            .filter(propagation_failure::Column::Account.eq(account))
            .order_by_asc(propagation_failure::Column::Community)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete the failure row of one account and target community.
    pub async fn delete_by_pair(&self, account: &str, community: &str) -> AppResult<u64> {
        PropagationFailure::delete_many()
            .filter(propagation_failure::Column::Account.eq(account))
            .filter(propagation_failure::Column::Community.eq(community))
            .exec(self.db.as_ref())
            .await
            .map(|res| res.rows_affected)
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete every failure row of an account.
    pub async fn delete_by_account(&self, account: &str) -> AppResult<u64> {
        PropagationFailure::delete_many()
            .filter(propagation_failure::Column::Account.eq(account))
            .exec(self.db.as_ref())
            .await
            .map(|res| res.rows_affected)
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
