//! Per-community moderation-log cursors.

use std::collections::HashMap;

use ada_common::AppResult;
use ada_db::repositories::CheckpointRepository;
use async_trait::async_trait;
use chrono::Utc;

use super::model::{Checkpoint, CommunityName};

/// Trait for checkpoint persistence.
///
/// Checkpoints never move backwards.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Every stored checkpoint.
    async fn get_all(&self) -> AppResult<HashMap<CommunityName, Checkpoint>>;

    /// Checkpoint of one community.
    async fn get(&self, community: &CommunityName) -> AppResult<Option<Checkpoint>>;

    /// Move a checkpoint forward. Returns the stored value, which is the old
    /// one when `checkpoint` is not newer.
    async fn advance(
        &self,
        community: &CommunityName,
        checkpoint: Checkpoint,
    ) -> AppResult<Checkpoint>;
}

#[async_trait]
impl CheckpointStore for CheckpointRepository {
    async fn get_all(&self) -> AppResult<HashMap<CommunityName, Checkpoint>> {
        let rows = Self::get_all(self).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match CommunityName::parse(&row.community) {
                Ok(name) => Some((name, Checkpoint(row.last_entry_at.with_timezone(&Utc)))),
                Err(e) => {
                    tracing::warn!(community = %row.community, error = %e, "Skipping bad checkpoint row");
                    None
                }
            })
            .collect())
    }

    async fn get(&self, community: &CommunityName) -> AppResult<Option<Checkpoint>> {
        Ok(Self::get(self, community.as_str())
            .await?
            .map(|row| Checkpoint(row.last_entry_at.with_timezone(&Utc))))
    }

    async fn advance(
        &self,
        community: &CommunityName,
        checkpoint: Checkpoint,
    ) -> AppResult<Checkpoint> {
        let row = Self::advance(self, community.as_str(), checkpoint.0).await?;
        Ok(Checkpoint(row.last_entry_at.with_timezone(&Utc)))
    }
}
