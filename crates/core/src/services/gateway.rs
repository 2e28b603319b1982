//! Community platform gateway.
//!
//! Provides an abstraction over the platform the bot moderates.
//! The actual implementation is provided by the `ada-reddit` crate.

use async_trait::async_trait;
use ada_common::AppResult;
use chrono::{DateTime, Utc};

use super::model::{Account, Checkpoint, CommunityName, ModLogEntry};

/// Trait for platform access.
///
/// This allows the propagation services to read moderation state and apply
/// bans without depending on a concrete platform client. Every call may be
/// slow; callers wrap them in timeouts.
#[async_trait]
pub trait CommunityGateway: Send + Sync {
    /// The account the bot acts as.
    async fn bot_account(&self) -> AppResult<Account>;

    /// Communities the bot moderates.
    async fn list_moderated_communities(&self) -> AppResult<Vec<CommunityName>>;

    /// Moderators of a community.
    async fn list_moderators(&self, community: &CommunityName) -> AppResult<Vec<Account>>;

    /// Moderation-log ban entries newer than `since`, in any order.
    ///
    /// `None` returns everything the platform still retains.
    async fn list_moderation_log(
        &self,
        community: &CommunityName,
        since: Option<Checkpoint>,
    ) -> AppResult<Vec<ModLogEntry>>;

    /// Whether the account is currently banned in the community.
    async fn is_banned(&self, community: &CommunityName, account: &Account) -> AppResult<bool>;

    /// Ban the account with a private moderator note.
    async fn apply_ban(
        &self,
        community: &CommunityName,
        account: &Account,
        note: &str,
    ) -> AppResult<()>;

    /// Read a persisted page. `None` if the page does not exist.
    async fn read_page(&self, community: &CommunityName, page_id: &str)
    -> AppResult<Option<String>>;

    /// Replace a persisted page.
    async fn write_page(
        &self,
        community: &CommunityName,
        page_id: &str,
        text: &str,
        reason: &str,
    ) -> AppResult<()>;

    /// Send a private message to an account.
    async fn send_message(&self, recipient: &Account, subject: &str, body: &str) -> AppResult<()>;

    /// Send a message to a community's moderators.
    async fn message_community(
        &self,
        community: &CommunityName,
        subject: &str,
        body: &str,
    ) -> AppResult<()>;

    /// Public activity of an account, for evidence reports.
    async fn account_activity(&self, account: &Account) -> AppResult<AccountStanding>;
}

/// Platform standing of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStanding {
    /// The profile is visible.
    Visible(AccountActivity),
    /// The profile is forbidden, which usually means suspension.
    Suspended,
    /// The profile is not found, which usually means a shadow ban.
    ShadowBanned,
}

/// Public profile and recent activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountActivity {
    pub created_at: DateTime<Utc>,
    pub link_karma: i64,
    pub comment_karma: i64,
    pub verified_email: bool,
    pub submissions: Vec<ActivityItem>,
    pub comments: Vec<ActivityItem>,
}

/// One submission or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityItem {
    pub community: String,
    pub removed: bool,
    /// Comment body or submission self-text.
    pub body: String,
    /// Link target of a link submission.
    pub url: Option<String>,
}
