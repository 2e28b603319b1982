//! Checkpoint repository.

use std::sync::Arc;

use crate::entities::{community_checkpoint, CommunityCheckpoint};
use ada_common::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

/// Checkpoint repository for database operations.
#[derive(Clone)]
pub struct CheckpointRepository {
    db: Arc<DatabaseConnection>,
}

impl CheckpointRepository {
    /// Create a new checkpoint repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Get the checkpoint of a community.
    pub async fn get(&self, community: &str) -> AppResult<Option<community_checkpoint::Model>> {
        CommunityCheckpoint::find_by_id(community)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get every stored checkpoint.
    pub async fn get_all(&self) -> AppResult<Vec<community_checkpoint::Model>> {
        CommunityCheckpoint::find()
            .order_by_asc(community_checkpoint::Column::Community)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move a community's checkpoint forward.
    ///
    /// A value at or before the stored checkpoint leaves it unchanged and
    /// returns the stored row.
    pub async fn advance(
        &self,
        community: &str,
        at: DateTime<Utc>,
    ) -> AppResult<community_checkpoint::Model> {
        let now = Utc::now();
        match self.get(community).await? {
            Some(existing) if existing.last_entry_at >= at => Ok(existing),
            Some(existing) => {
                let mut model: community_checkpoint::ActiveModel = existing.into();
                model.last_entry_at = Set(at.into());
                model.updated_at = Set(now.into());
                model
                    .update(self.db.as_ref())
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))
            }
            None => community_checkpoint::ActiveModel {
                community: Set(community.to_string()),
                last_entry_at: Set(at.into()),
                updated_at: Set(now.into()),
            }
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn checkpoint(community: &str, at: DateTime<Utc>) -> community_checkpoint::Model {
        community_checkpoint::Model {
            community: community.to_string(),
            last_entry_at: at.into(),
            updated_at: at.into(),
        }
    }

    #[tokio::test]
    async fn test_get_all() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[checkpoint("a", at), checkpoint("b", at)]])
                .into_connection(),
        );

        let repo = CheckpointRepository::new(db);
        let result = repo.get_all().await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].community, "a");
    }

    #[tokio::test]
    async fn test_advance_never_moves_backwards() {
        let stored = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[checkpoint("a", stored)]])
                .into_connection(),
        );

        let repo = CheckpointRepository::new(db);
        let result = repo.advance("a", older).await.unwrap();

        assert_eq!(result.last_entry_at, stored.fixed_offset());
    }

    #[tokio::test]
    async fn test_advance_inserts_first_checkpoint() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<community_checkpoint::Model>::new()])
                .append_query_results([[checkpoint("a", at)]])
                .into_connection(),
        );

        let repo = CheckpointRepository::new(db);
        let result = repo.advance("a", at).await.unwrap();

        assert_eq!(result.community, "a");
    }
}
