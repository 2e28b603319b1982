//! Domain types shared by the propagation services.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use ada_common::{AppError, AppResult};
use chrono::{DateTime, Utc};

pub use ada_db::entities::propagation_failure::FailureKind;

/// Strip a known prefix, trim and validate a platform identifier.
fn clean_identifier<'a>(raw: &'a str, prefixes: &[&str]) -> AppResult<&'a str> {
    let mut value = raw.trim();
    for prefix in prefixes {
        let stripped = value
            .get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .and_then(|_| value.get(prefix.len()..));
        if let Some(rest) = stripped {
            value = rest;
            break;
        }
    }
    if value.is_empty() {
        return Err(AppError::Internal(format!("empty identifier: {raw:?}")));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '|' || c == '/')
    {
        return Err(AppError::Internal(format!("invalid identifier: {raw:?}")));
    }
    Ok(value)
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $prefixes:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            display: String,
            key: String,
        }

        impl $name {
            /// Parse and normalize an identifier.
            pub fn parse(raw: &str) -> AppResult<Self> {
                let display = clean_identifier(raw, $prefixes)?;
                Ok(Self {
                    display: display.to_string(),
                    key: display.to_lowercase(),
                })
            }

            /// Canonical (lowercased) form used for equality.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.key
            }

            /// Form as first observed, used in messages and on the page.
            #[must_use]
            pub fn display_name(&self) -> &str {
                &self.display
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.key.cmp(&other.key)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.display)
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

identifier!(
    /// A platform account, compared case-insensitively.
    Account,
    &["/u/", "u/"]
);

identifier!(
    /// A community identifier, compared case-insensitively.
    CommunityName,
    &["/r/", "r/"]
);

/// Registry status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanStatus {
    /// Banned everywhere this bot moderates.
    Active,
    /// Exempt from propagation.
    Ignored,
}

impl BanStatus {
    /// Page representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ignored => "ignored",
        }
    }
}

impl FromStr for BanStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "ignored" => Ok(Self::Ignored),
            other => Err(AppError::RegistryCorruption(format!(
                "unknown status {other:?}"
            ))),
        }
    }
}

impl fmt::Display for BanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub account: Account,
    pub status: BanStatus,
    pub source_community: CommunityName,
    pub first_seen_at: DateTime<Utc>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub evidence_ref: Option<String>,
}

impl BanRecord {
    /// Whether reconciliation may act on this account.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == BanStatus::Active
    }
}

/// Position in a community's moderation log.
///
/// Entries with a timestamp at or before the checkpoint are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint(pub DateTime<Utc>);

impl Checkpoint {
    /// Whether an entry at `at` lies after this checkpoint.
    #[must_use]
    pub fn precedes(self, at: DateTime<Utc>) -> bool {
        at > self.0
    }
}

/// A community administered by this bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeratedCommunity {
    pub name: CommunityName,
    pub checkpoint: Option<Checkpoint>,
    pub is_main_list: bool,
}

/// Kind of a moderation-log action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModAction {
    Ban,
    Unban,
    Other(String),
}

/// One moderation-log entry as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModLogEntry {
    pub id: String,
    pub account: Account,
    pub action: ModAction,
    pub moderator: Account,
    /// Private moderator note; never the user-facing ban message.
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ban note, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    /// Contains the trigger keyword; a moderator asked for propagation.
    Trigger,
    /// Exactly the note this bot attaches to bans it applies.
    System,
    /// Any other note.
    Untagged,
}

impl NoteKind {
    /// Classify a note. The system note is recognized before the keyword so
    /// a keyword contained in the system note never re-triggers.
    #[must_use]
    pub fn classify(note: &str, keyword: &str, system_note: &str) -> Self {
        if note.trim() == system_note.trim() {
            Self::System
        } else if !keyword.is_empty() && note.contains(keyword) {
            Self::Trigger
        } else {
            Self::Untagged
        }
    }
}

/// A ban observed in a moderation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEvent {
    pub account: Account,
    pub community: CommunityName,
    pub moderator: Account,
    pub note_text: String,
    pub timestamp: DateTime<Utc>,
    pub keyword_matched: bool,
}

/// What the reconciler decided for one target community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    ApplyBan,
    SkipIgnored,
    AlreadySatisfied,
    /// Held back by an unresolved permanent failure.
    SkipBlocked,
}

/// Ban state of an account on one community, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Banned,
    NotBanned,
    /// The lookup failed or timed out.
    Unknown,
}

/// A per-target decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredAction {
    pub account: Account,
    pub target_community: CommunityName,
    pub kind: ActionKind,
}

/// A failed ban on one target community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PropagationFailure {
    /// Classify a gateway error.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        let kind = match err {
            AppError::PermanentAction(_) | AppError::NotFound(_) => FailureKind::Permanent,
            _ => FailureKind::Transient,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Registry change proposed by the reconciler and committed by the
/// coordinator once gateway actions have run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDelta {
    pub account: Account,
    pub source_community: CommunityName,
    pub first_seen_at: DateTime<Utc>,
    pub reconciled_at: DateTime<Utc>,
    /// Create an active row when none exists.
    pub activate: bool,
    pub evidence_ref: Option<String>,
    pub applied: BTreeSet<CommunityName>,
    pub satisfied: BTreeSet<CommunityName>,
    pub failed: BTreeMap<CommunityName, PropagationFailure>,
}

impl RegistryDelta {
    /// Fold the result of one ban call into the delta.
    pub fn record_result(&mut self, community: CommunityName, result: &AppResult<()>) {
        match result {
            Ok(()) => {
                self.failed.remove(&community);
                self.applied.insert(community);
            }
            Err(err) => {
                self.failed
                    .insert(community, PropagationFailure::from_error(err));
            }
        }
    }

    /// Merge the delta into an existing row, or create one.
    ///
    /// Status, source and first-seen time of an existing row are never
    /// changed; the row as currently persisted wins.
    #[must_use]
    pub fn merge_into(&self, existing: Option<&BanRecord>) -> Option<BanRecord> {
        match existing {
            Some(record) => {
                let last = match record.last_reconciled_at {
                    Some(prev) if prev > self.reconciled_at => prev,
                    _ => self.reconciled_at,
                };
                Some(BanRecord {
                    last_reconciled_at: Some(last),
                    evidence_ref: record
                        .evidence_ref
                        .clone()
                        .or_else(|| self.evidence_ref.clone()),
                    ..record.clone()
                })
            }
            None if self.activate => Some(BanRecord {
                account: self.account.clone(),
                status: BanStatus::Active,
                source_community: self.source_community.clone(),
                first_seen_at: self.first_seen_at,
                last_reconciled_at: Some(self.reconciled_at),
                evidence_ref: self.evidence_ref.clone(),
            }),
            None => None,
        }
    }
}
