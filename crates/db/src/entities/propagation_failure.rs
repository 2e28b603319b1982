//! Propagation failure entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Whether a failed propagation is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum FailureKind {
    /// Retried on the next cycle.
    #[sea_orm(string_value = "transient")]
    Transient,
    /// Held until cleared by an operator.
    #[sea_orm(string_value = "permanent")]
    Permanent,
}

/// A ban that could not be applied to one target community.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "propagation_failure")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Normalized account name.
    pub account: String,
    /// Normalized target community.
    pub community: String,
    /// Retry classification.
    pub kind: FailureKind,
    /// Most recent error message.
    pub last_error: String,
    /// Number of failed attempts so far.
    pub attempts: i32,
    /// When the first attempt failed.
    pub first_failed_at: DateTimeWithTimeZone,
    /// When the most recent attempt failed.
    pub last_failed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
