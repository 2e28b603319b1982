//! Evidence report entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Evidence gathered about an account when it first entered the registry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "evidence_report")]
pub struct Model {
    /// Referenced from the registry page's `evidence_ref` column.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Normalized account name.
    pub account: String,
    /// Community where the triggering ban was observed.
    pub source_community: String,
    /// Moderator who applied the triggering ban.
    pub moderator: Option<String>,
    /// Markdown report body.
    #[sea_orm(column_type = "Text")]
    pub body: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
