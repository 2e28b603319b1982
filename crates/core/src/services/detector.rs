//! Tagged-ban detection from moderation logs.

use std::sync::Arc;

use ada_common::AppResult;
use chrono::{DateTime, Duration, Utc};

use super::gateway::CommunityGateway;
use super::model::{
    Account, BanEvent, Checkpoint, CommunityName, ModAction, ModLogEntry, NoteKind,
};

/// How far behind the fetch time an empty onboarding log is checkpointed.
/// Log timestamps are whole seconds from the platform's clock, so entries
/// written around the fetch are read again rather than skipped.
pub const ONBOARDING_OVERLAP: Duration = Duration::seconds(60);

/// The checkpoint to store when processing stopped at an entry created at
/// `at`, so that entry is read again next cycle.
#[must_use]
pub fn checkpoint_before(at: DateTime<Utc>) -> Checkpoint {
    Checkpoint(at - Duration::microseconds(1))
}

/// Finds bans a moderator tagged for propagation.
#[derive(Clone)]
pub struct ActionDetector {
    gateway: Arc<dyn CommunityGateway>,
    keyword: String,
    system_note: String,
    bot: Account,
}

impl ActionDetector {
    /// Create a new detector.
    ///
    /// `bot` is the account the bot acts as; its own bans are never events.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommunityGateway>,
        keyword: impl Into<String>,
        system_note: impl Into<String>,
        bot: Account,
    ) -> Self {
        Self {
            gateway,
            keyword: keyword.into(),
            system_note: system_note.into(),
            bot,
        }
    }

    /// Fetch the moderation log of `community` after `since`.
    pub async fn detect(
        &self,
        community: &CommunityName,
        since: Option<Checkpoint>,
    ) -> AppResult<DetectedBatch> {
        let fetched_at = Utc::now();
        let mut entries = self.gateway.list_moderation_log(community, since).await?;

        let returned = entries.len();
        entries.retain(|e| since.is_none_or(|cp| cp.precedes(e.created_at)));
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        tracing::debug!(
            community = %community,
            returned,
            kept = entries.len(),
            "Fetched moderation log"
        );

        Ok(DetectedBatch {
            community: community.clone(),
            entries,
            fetched_at,
            keyword: self.keyword.clone(),
            system_note: self.system_note.clone(),
            bot: self.bot.clone(),
        })
    }
}

/// Moderation-log entries of one community, oldest first.
#[derive(Debug, Clone)]
pub struct DetectedBatch {
    community: CommunityName,
    entries: Vec<ModLogEntry>,
    fetched_at: DateTime<Utc>,
    keyword: String,
    system_note: String,
    bot: Account,
}

impl DetectedBatch {
    /// The community the log belongs to.
    #[must_use]
    pub const fn community(&self) -> &CommunityName {
        &self.community
    }

    /// When the log was requested.
    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Checkpoint for a community onboarded with an empty log.
    #[must_use]
    pub fn onboarding_checkpoint(&self) -> Checkpoint {
        Checkpoint(self.fetched_at - ONBOARDING_OVERLAP)
    }

    /// Number of entries after the checkpoint, tagged or not.
    #[must_use]
    pub fn scanned(&self) -> usize {
        self.entries.len()
    }

    /// Newest entry seen, including entries that produced no event.
    #[must_use]
    pub fn scanned_through(&self) -> Option<Checkpoint> {
        self.entries.last().map(|e| Checkpoint(e.created_at))
    }

    /// Tagged ban events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = BanEvent> + '_ {
        self.entries.iter().filter_map(|entry| self.to_event(entry))
    }

    fn to_event(&self, entry: &ModLogEntry) -> Option<BanEvent> {
        if entry.action != ModAction::Ban || entry.moderator == self.bot {
            return None;
        }
        let note = entry.note.as_deref()?;
        match NoteKind::classify(note, &self.keyword, &self.system_note) {
            NoteKind::Trigger => Some(BanEvent {
                account: entry.account.clone(),
                community: self.community.clone(),
                moderator: entry.moderator.clone(),
                note_text: note.to_string(),
                timestamp: entry.created_at,
                keyword_matched: true,
            }),
            NoteKind::System | NoteKind::Untagged => None,
        }
    }
}
