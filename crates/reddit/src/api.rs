//! Reddit JSON response shapes and their mapping to domain types.

#![allow(missing_docs)]

use ada_common::{AppError, AppResult};
use ada_core::{Account, ActivityItem, CommunityName, ModAction, ModLogEntry};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `{"kind": "Listing", "data": {...}}`
#[derive(Debug, Deserialize)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
pub struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Thing<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Me {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Subreddit {
    pub display_name: String,
}

/// Entry of a `UserList`.
#[derive(Debug, Deserialize)]
pub struct UserListEntry {
    pub name: String,
}

/// `about/moderators` and `about/banned` return a `UserList` whose
/// children are not wrapped in things.
#[derive(Debug, Deserialize)]
pub struct UserList {
    pub data: UserListData,
}

#[derive(Debug, Deserialize)]
pub struct UserListData {
    #[serde(default)]
    pub children: Vec<UserListEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ModLogItem {
    pub id: String,
    pub action: String,
    #[serde(rename = "mod")]
    pub moderator: String,
    pub target_author: Option<String>,
    /// Private note of a `banuser` action.
    pub description: Option<String>,
    pub created_utc: f64,
}

#[derive(Debug, Deserialize)]
pub struct WikiPage {
    pub data: WikiPageData,
}

#[derive(Debug, Deserialize)]
pub struct WikiPageData {
    pub content_md: String,
}

#[derive(Debug, Deserialize)]
pub struct UserAbout {
    pub data: UserAboutData,
}

#[derive(Debug, Deserialize)]
pub struct UserAboutData {
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub link_karma: i64,
    #[serde(default)]
    pub comment_karma: i64,
    #[serde(default)]
    pub has_verified_email: Option<bool>,
    #[serde(default)]
    pub is_suspended: bool,
}

/// A submission or comment in a user listing.
#[derive(Debug, Deserialize)]
pub struct UserItem {
    pub subreddit: String,
    /// Comment text.
    pub body: Option<String>,
    pub selftext: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub is_self: bool,
    pub removed_by_category: Option<String>,
}

/// `{"json": {"errors": [["CODE", "message", "field"]]}}` returned by
/// `api_type=json` endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct JsonEnvelope {
    #[serde(default)]
    pub json: JsonErrors,
}

#[derive(Debug, Default, Deserialize)]
pub struct JsonErrors {
    #[serde(default)]
    pub errors: Vec<Vec<serde_json::Value>>,
}

impl JsonEnvelope {
    /// First error as `CODE: message`.
    pub fn first_error(&self) -> Option<String> {
        self.json.errors.first().map(|parts| {
            parts
                .iter()
                .take(2)
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join(": ")
        })
    }
}

pub fn timestamp(secs: f64) -> AppResult<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let micros = ((secs - secs.trunc()) * 1_000_000.0).round() as u32;
    DateTime::from_timestamp(whole, micros.saturating_mul(1000))
        .ok_or_else(|| AppError::Internal(format!("timestamp out of range: {secs}")))
}

impl ModLogItem {
    /// Domain entry, or `None` for entries without a target account.
    pub fn into_entry(self) -> AppResult<Option<ModLogEntry>> {
        let target = self
            .target_author
            .filter(|t| !t.is_empty() && t != "[deleted]");
        let Some(target) = target else {
            return Ok(None);
        };
        let action = match self.action.as_str() {
            "banuser" => ModAction::Ban,
            "unbanuser" => ModAction::Unban,
            other => ModAction::Other(other.to_string()),
        };
        Ok(Some(ModLogEntry {
            id: self.id,
            account: Account::parse(&target)?,
            action,
            moderator: Account::parse(&self.moderator)?,
            note: self.description.filter(|d| !d.is_empty()),
            created_at: timestamp(self.created_utc)?,
        }))
    }
}

impl UserItem {
    /// Whether the item was removed. Comments show `[removed]` in place of
    /// their body; submissions carry a removal category.
    pub fn removed(&self) -> bool {
        if let Some(body) = &self.body {
            return body.contains("[removed]");
        }
        self.removed_by_category.is_some()
    }

    pub fn into_activity(self) -> ActivityItem {
        let removed = self.removed();
        let url = if self.is_self || self.body.is_some() {
            None
        } else {
            self.url
        };
        ActivityItem {
            community: self.subreddit,
            removed,
            body: self.body.or(self.selftext).unwrap_or_default(),
            url,
        }
    }
}

/// Names of moderated subreddits. Names the domain rejects are dropped.
pub fn communities(subreddits: Vec<Subreddit>) -> Vec<CommunityName> {
    subreddits
        .into_iter()
        .filter_map(|s| CommunityName::parse(&s.display_name).ok())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_log_entry() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "ModAction_2",
                "children": [
                    {"kind": "modaction", "data": {
                        "id": "ModAction_1",
                        "action": "banuser",
                        "mod": "Mod1",
                        "target_author": "spambot1",
                        "description": "Spam ADA",
                        "details": "permanent",
                        "created_utc": 1704067200.0
                    }},
                    {"kind": "modaction", "data": {
                        "id": "ModAction_2",
                        "action": "banuser",
                        "mod": "Mod1",
                        "target_author": "[deleted]",
                        "description": null,
                        "created_utc": 1704067100.5
                    }}
                ]
            }
        }"#;
        let listing: Listing<ModLogItem> = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.data.after.as_deref(), Some("ModAction_2"));

        let entries: Vec<_> = listing
            .data
            .children
            .into_iter()
            .filter_map(|t| t.data.into_entry().unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.action, ModAction::Ban);
        assert_eq!(entry.account.as_str(), "spambot1");
        assert_eq!(entry.moderator.as_str(), "mod1");
        assert_eq!(entry.note.as_deref(), Some("Spam ADA"));
        assert_eq!(entry.created_at.timestamp(), 1_704_067_200);
    }

    #[test]
    fn test_fractional_timestamp() {
        let at = timestamp(1_704_067_100.5).unwrap();
        assert_eq!(at.timestamp(), 1_704_067_100);
        assert_eq!(at.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_removed_detection() {
        let comment: UserItem = serde_json::from_str(
            r#"{"subreddit": "a", "body": "[removed]", "removed_by_category": null}"#,
        )
        .unwrap();
        assert!(comment.removed());

        let post: UserItem = serde_json::from_str(
            r#"{"subreddit": "a", "selftext": "", "url": "https://spam.example/x",
                "is_self": false, "removed_by_category": "reddit"}"#,
        )
        .unwrap();
        assert!(post.removed());
        let item = post.into_activity();
        assert_eq!(item.url.as_deref(), Some("https://spam.example/x"));
        assert!(item.body.is_empty());
    }

    #[test]
    fn test_json_errors() {
        let envelope: JsonEnvelope = serde_json::from_str(
            r#"{"json": {"errors": [["USER_DOESNT_EXIST", "that user doesn't exist", "name"]]}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.first_error().as_deref(),
            Some("USER_DOESNT_EXIST: that user doesn't exist")
        );

        let ok: JsonEnvelope = serde_json::from_str(r#"{"json": {"errors": []}}"#).unwrap();
        assert!(ok.first_error().is_none());
    }

    #[test]
    fn test_moderated_communities() {
        let raw = r#"{"kind": "Listing", "data": {"after": null, "children": [
            {"kind": "t5", "data": {"display_name": "AdaList"}},
            {"kind": "t5", "data": {"display_name": "a"}}
        ]}}"#;
        let listing: Listing<Subreddit> = serde_json::from_str(raw).unwrap();
        let names = communities(listing.data.children.into_iter().map(|t| t.data).collect());
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].as_str(), "adalist");
    }
}
