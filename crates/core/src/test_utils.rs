//! In-memory doubles for tests.
//!
//! [`FakeGateway`] models a small platform: communities with moderators,
//! moderation logs, bans, pages and messages, with failure injection.
//! Bans it applies show up in the community's moderation log the way real
//! ones do.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ada_common::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::services::checkpoint::CheckpointStore;
use crate::services::evidence::{EvidenceReport, EvidenceStore};
use crate::services::gateway::{AccountActivity, AccountStanding, CommunityGateway};
use crate::services::model::{
    Account, Checkpoint, CommunityName, FailureKind, ModAction, ModLogEntry, PropagationFailure,
};
use crate::services::retry_ledger::{PendingRetry, RetryLedger, RetryPolicy};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(raw: &str) -> String {
    raw.trim_start_matches("r/").to_lowercase()
}

/// A message recorded by [`FakeGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Account key, or `r/<community>` for community mail.
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
struct FakeState {
    bot: Option<String>,
    communities: Vec<String>,
    moderators: HashMap<String, Vec<String>>,
    logs: HashMap<String, Vec<ModLogEntry>>,
    banned: HashSet<(String, String)>,
    bans: Vec<(String, String, String)>,
    ban_attempts: usize,
    pages: HashMap<(String, String), String>,
    page_writes: usize,
    messages: Vec<SentMessage>,
    activity: HashMap<String, AccountStanding>,
    next_log_id: usize,
    ignore_since: bool,
    fail_communities: Option<AppError>,
    fail_moderators: Option<AppError>,
    fail_logs: HashMap<String, AppError>,
    fail_lookups: HashMap<String, AppError>,
    fail_bans: HashMap<String, AppError>,
    fail_page_writes: Option<AppError>,
    fail_messages: Option<AppError>,
}

/// In-memory [`CommunityGateway`].
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    /// Bot account name unless [`FakeGateway::set_bot`] is called.
    pub const BOT: &'static str = "ada_bot";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a moderated community.
    pub fn add_community(&self, name: &str, moderators: &[&str]) {
        let mut s = lock(&self.state);
        let k = key(name);
        if !s.communities.contains(&k) {
            s.communities.push(k.clone());
        }
        s.moderators
            .insert(k, moderators.iter().map(|m| m.to_lowercase()).collect());
    }

    /// Stop moderating a community.
    pub fn remove_community(&self, name: &str) {
        let k = key(name);
        lock(&self.state).communities.retain(|c| *c != k);
    }

    pub fn set_bot(&self, name: &str) {
        lock(&self.state).bot = Some(name.to_string());
    }

    fn next_id(s: &mut FakeState) -> String {
        s.next_log_id += 1;
        format!("ModAction_{}", s.next_log_id)
    }

    fn push_entry(
        &self,
        community: &str,
        account: &str,
        moderator: &str,
        action: ModAction,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let (Ok(account), Ok(moderator)) = (Account::parse(account), Account::parse(moderator))
        else {
            return;
        };
        let mut s = lock(&self.state);
        let id = Self::next_id(&mut s);
        let entry = ModLogEntry {
            id,
            account,
            action,
            moderator,
            note: note.map(str::to_string),
            created_at: at,
        };
        s.logs.entry(key(community)).or_default().push(entry);
    }

    /// Record a ban by a human moderator. The account is banned as well.
    pub fn push_log(
        &self,
        community: &str,
        account: &str,
        moderator: &str,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) {
        self.push_entry(community, account, moderator, ModAction::Ban, note, at);
        lock(&self.state)
            .banned
            .insert((key(community), account.to_lowercase()));
    }

    pub fn push_unban(&self, community: &str, account: &str, moderator: &str, at: DateTime<Utc>) {
        self.push_entry(community, account, moderator, ModAction::Unban, None, at);
        lock(&self.state)
            .banned
            .remove(&(key(community), account.to_lowercase()));
    }

    /// Return log entries at or before `since` as a lagging API would.
    pub fn ignore_since_filter(&self, ignore: bool) {
        lock(&self.state).ignore_since = ignore;
    }

    /// Mark an account banned without a log entry.
    pub fn set_banned(&self, community: &str, account: &str) {
        lock(&self.state)
            .banned
            .insert((key(community), account.to_lowercase()));
    }

    /// Lift a ban outside the bot's control.
    pub fn unban(&self, community: &str, account: &str) {
        lock(&self.state)
            .banned
            .remove(&(key(community), account.to_lowercase()));
    }

    #[must_use]
    pub fn is_banned_in(&self, community: &str, account: &str) -> bool {
        lock(&self.state)
            .banned
            .contains(&(key(community), account.to_lowercase()))
    }

    pub fn set_activity(&self, account: &str, standing: AccountStanding) {
        lock(&self.state)
            .activity
            .insert(account.to_lowercase(), standing);
    }

    pub fn set_page(&self, community: &str, page_id: &str, text: &str) {
        lock(&self.state)
            .pages
            .insert((key(community), page_id.to_string()), text.to_string());
    }

    #[must_use]
    pub fn page(&self, community: &str, page_id: &str) -> Option<String> {
        lock(&self.state)
            .pages
            .get(&(key(community), page_id.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn page_writes(&self) -> usize {
        lock(&self.state).page_writes
    }

    /// Successful bans as `(community, account, note)`.
    #[must_use]
    pub fn bans(&self) -> Vec<(String, String, String)> {
        lock(&self.state).bans.clone()
    }

    /// Every `apply_ban` call, failed or not.
    #[must_use]
    pub fn ban_attempts(&self) -> usize {
        lock(&self.state).ban_attempts
    }

    #[must_use]
    pub fn messages(&self) -> Vec<SentMessage> {
        lock(&self.state).messages.clone()
    }

    pub fn fail_communities(&self, err: Option<AppError>) {
        lock(&self.state).fail_communities = err;
    }

    pub fn fail_moderators(&self, err: Option<AppError>) {
        lock(&self.state).fail_moderators = err;
    }

    pub fn fail_logs(&self, community: &str, err: AppError) {
        lock(&self.state).fail_logs.insert(key(community), err);
    }

    pub fn fail_lookups(&self, community: &str, err: AppError) {
        lock(&self.state).fail_lookups.insert(key(community), err);
    }

    pub fn fail_bans(&self, community: &str, err: AppError) {
        lock(&self.state).fail_bans.insert(key(community), err);
    }

    pub fn clear_ban_failure(&self, community: &str) {
        lock(&self.state).fail_bans.remove(&key(community));
    }

    pub fn fail_page_writes(&self, err: AppError) {
        lock(&self.state).fail_page_writes = Some(err);
    }

    pub fn clear_page_failure(&self) {
        lock(&self.state).fail_page_writes = None;
    }

    pub fn fail_messages(&self, err: AppError) {
        lock(&self.state).fail_messages = Some(err);
    }
}

#[async_trait]
impl CommunityGateway for FakeGateway {
    async fn bot_account(&self) -> AppResult<Account> {
        let bot = lock(&self.state).bot.clone();
        Account::parse(bot.as_deref().unwrap_or(Self::BOT))
    }

    async fn list_moderated_communities(&self) -> AppResult<Vec<CommunityName>> {
        let s = lock(&self.state);
        if let Some(err) = &s.fail_communities {
            return Err(err.clone());
        }
        s.communities.iter().map(|c| CommunityName::parse(c)).collect()
    }

    async fn list_moderators(&self, community: &CommunityName) -> AppResult<Vec<Account>> {
        let s = lock(&self.state);
        if let Some(err) = &s.fail_moderators {
            return Err(err.clone());
        }
        s.moderators
            .get(community.as_str())
            .into_iter()
            .flatten()
            .map(|m| Account::parse(m))
            .collect()
    }

    async fn list_moderation_log(
        &self,
        community: &CommunityName,
        since: Option<Checkpoint>,
    ) -> AppResult<Vec<ModLogEntry>> {
        let s = lock(&self.state);
        if let Some(err) = s.fail_logs.get(community.as_str()) {
            return Err(err.clone());
        }
        let mut entries: Vec<ModLogEntry> = s
            .logs
            .get(community.as_str())
            .into_iter()
            .flatten()
            .filter(|e| s.ignore_since || since.is_none_or(|cp| cp.precedes(e.created_at)))
            .cloned()
            .collect();
        // Newest first, as the platform returns them.
        entries.reverse();
        Ok(entries)
    }

    async fn is_banned(&self, community: &CommunityName, account: &Account) -> AppResult<bool> {
        let s = lock(&self.state);
        if let Some(err) = s.fail_lookups.get(community.as_str()) {
            return Err(err.clone());
        }
        Ok(s
            .banned
            .contains(&(community.as_str().to_string(), account.as_str().to_string())))
    }

    async fn apply_ban(
        &self,
        community: &CommunityName,
        account: &Account,
        note: &str,
    ) -> AppResult<()> {
        let bot = {
            let mut s = lock(&self.state);
            s.ban_attempts += 1;
            if let Some(err) = s.fail_bans.get(community.as_str()) {
                return Err(err.clone());
            }
            s.banned
                .insert((community.as_str().to_string(), account.as_str().to_string()));
            s.bans.push((
                community.as_str().to_string(),
                account.as_str().to_string(),
                note.to_string(),
            ));
            s.bot.clone().unwrap_or_else(|| Self::BOT.to_string())
        };
        self.push_entry(
            community.as_str(),
            account.as_str(),
            &bot,
            ModAction::Ban,
            Some(note),
            Utc::now(),
        );
        Ok(())
    }

    async fn read_page(&self, community: &CommunityName, page_id: &str) -> AppResult<Option<String>> {
        Ok(self.page(community.as_str(), page_id))
    }

    async fn write_page(
        &self,
        community: &CommunityName,
        page_id: &str,
        text: &str,
        _reason: &str,
    ) -> AppResult<()> {
        let mut s = lock(&self.state);
        if let Some(err) = &s.fail_page_writes {
            return Err(err.clone());
        }
        s.page_writes += 1;
        s.pages.insert(
            (community.as_str().to_string(), page_id.to_string()),
            text.to_string(),
        );
        Ok(())
    }

    async fn send_message(&self, recipient: &Account, subject: &str, body: &str) -> AppResult<()> {
        let mut s = lock(&self.state);
        if let Some(err) = &s.fail_messages {
            return Err(err.clone());
        }
        s.messages.push(SentMessage {
            recipient: recipient.as_str().to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn message_community(
        &self,
        community: &CommunityName,
        subject: &str,
        body: &str,
    ) -> AppResult<()> {
        let mut s = lock(&self.state);
        if let Some(err) = &s.fail_messages {
            return Err(err.clone());
        }
        s.messages.push(SentMessage {
            recipient: format!("r/{}", community.as_str()),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn account_activity(&self, account: &Account) -> AppResult<AccountStanding> {
        let s = lock(&self.state);
        Ok(s.activity.get(account.as_str()).cloned().unwrap_or_else(|| {
            AccountStanding::Visible(AccountActivity {
                created_at: Utc
                    .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                    .single()
                    .unwrap_or_default(),
                link_karma: 1,
                comment_karma: 1,
                verified_email: false,
                submissions: Vec::new(),
                comments: Vec::new(),
            })
        }))
    }
}

/// In-memory [`CheckpointStore`].
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<CommunityName, Checkpoint>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_all(&self) -> AppResult<HashMap<CommunityName, Checkpoint>> {
        Ok(lock(&self.checkpoints).clone())
    }

    async fn get(&self, community: &CommunityName) -> AppResult<Option<Checkpoint>> {
        Ok(lock(&self.checkpoints).get(community).copied())
    }

    async fn advance(
        &self,
        community: &CommunityName,
        checkpoint: Checkpoint,
    ) -> AppResult<Checkpoint> {
        let mut all = lock(&self.checkpoints);
        let stored = all.entry(community.clone()).or_insert(checkpoint);
        if checkpoint > *stored {
            *stored = checkpoint;
        }
        Ok(*stored)
    }
}

/// One row of [`MemoryRetryLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub kind: FailureKind,
    pub attempts: u32,
    pub last_error: String,
}

/// In-memory [`RetryLedger`].
#[derive(Default)]
pub struct MemoryRetryLedger {
    policy: RetryPolicy,
    entries: Mutex<BTreeMap<(Account, CommunityName), LedgerEntry>>,
}

impl MemoryRetryLedger {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::default(),
        }
    }

    /// Every row, ordered by account and community.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String, LedgerEntry)> {
        lock(&self.entries)
            .iter()
            .map(|((a, c), e)| (a.as_str().to_string(), c.as_str().to_string(), e.clone()))
            .collect()
    }
}

#[async_trait]
impl RetryLedger for MemoryRetryLedger {
    async fn record(
        &self,
        account: &Account,
        community: &CommunityName,
        failure: &PropagationFailure,
    ) -> AppResult<FailureKind> {
        let mut entries = lock(&self.entries);
        let k = (account.clone(), community.clone());
        let (stored, attempts) = entries
            .get(&k)
            .map_or((None, 1), |e| (Some(e.kind), e.attempts.saturating_add(1)));
        let kind = self.policy.escalate(stored, failure.kind, attempts);
        entries.insert(
            k,
            LedgerEntry {
                kind,
                attempts,
                last_error: failure.message.clone(),
            },
        );
        Ok(kind)
    }

    async fn resolve(&self, account: &Account, community: &CommunityName) -> AppResult<()> {
        lock(&self.entries).remove(&(account.clone(), community.clone()));
        Ok(())
    }

    async fn pending(&self) -> AppResult<Vec<PendingRetry>> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|(_, e)| e.kind == FailureKind::Transient)
            .map(|((account, community), e)| PendingRetry {
                account: account.clone(),
                community: community.clone(),
                attempts: e.attempts,
                last_error: e.last_error.clone(),
            })
            .collect())
    }

    async fn blocked(&self, account: &Account) -> AppResult<HashSet<CommunityName>> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|((a, _), e)| a == account && e.kind == FailureKind::Permanent)
            .map(|((_, c), _)| c.clone())
            .collect())
    }

    async fn clear(&self, account: &Account) -> AppResult<u64> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(a, _), _| a != account);
        Ok((before - entries.len()) as u64)
    }
}

/// In-memory [`EvidenceStore`].
#[derive(Default)]
pub struct MemoryEvidenceStore {
    reports: Mutex<Vec<EvidenceReport>>,
}

impl MemoryEvidenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<EvidenceReport> {
        lock(&self.reports).clone()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn save(&self, report: &EvidenceReport) -> AppResult<()> {
        lock(&self.reports).push(report.clone());
        Ok(())
    }
}
