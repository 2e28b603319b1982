//! Community checkpoint entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Moderation-log cursor of one moderated community.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "community_checkpoint")]
pub struct Model {
    /// Normalized community name.
    #[sea_orm(primary_key, auto_increment = false)]
    pub community: String,
    /// Timestamp of the newest fully processed log entry.
    pub last_entry_at: DateTimeWithTimeZone,
    /// When the checkpoint was last advanced.
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
