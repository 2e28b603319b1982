//! Per account and target community failure tracking.
//!
//! A failed propagation ban is remembered here rather than on the registry
//! page. Transient rows are retried on later cycles; permanent rows block the
//! target until cleared.

use std::collections::HashSet;

use ada_common::{AppResult, IdGenerator};
use ada_db::{entities::propagation_failure, repositories::PropagationFailureRepository};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::Set;

use super::model::{Account, CommunityName, FailureKind, PropagationFailure};

/// When a repeatedly failing target stops being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient failures tolerated before a target is treated as permanent.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Check if we should retry after the given number of attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Kind to store after a failure, given the stored kind and the attempt
    /// count including this failure.
    #[must_use]
    pub const fn escalate(
        &self,
        stored: Option<FailureKind>,
        failure: FailureKind,
        attempts: u32,
    ) -> FailureKind {
        match (stored, failure) {
            (Some(FailureKind::Permanent), _) | (_, FailureKind::Permanent) => {
                FailureKind::Permanent
            }
            (_, FailureKind::Transient) if self.should_retry(attempts) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

/// A transient failure waiting for the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub account: Account,
    pub community: CommunityName,
    pub attempts: u32,
    pub last_error: String,
}

/// Trait for the failure ledger.
#[async_trait]
pub trait RetryLedger: Send + Sync {
    /// Record a failure. Returns the stored kind, which may have been
    /// escalated to permanent.
    async fn record(
        &self,
        account: &Account,
        community: &CommunityName,
        failure: &PropagationFailure,
    ) -> AppResult<FailureKind>;

    /// Forget the failure of a target that is now banned.
    async fn resolve(&self, account: &Account, community: &CommunityName) -> AppResult<()>;

    /// Every transient failure.
    async fn pending(&self) -> AppResult<Vec<PendingRetry>>;

    /// Targets of an account blocked by a permanent failure.
    async fn blocked(&self, account: &Account) -> AppResult<HashSet<CommunityName>>;

    /// Remove every failure of an account. Returns the number removed.
    async fn clear(&self, account: &Account) -> AppResult<u64>;
}

/// Retry ledger stored in the database.
#[derive(Clone)]
pub struct DbRetryLedger {
    repo: PropagationFailureRepository,
    policy: RetryPolicy,
    id_gen: IdGenerator,
}

impl DbRetryLedger {
    /// Create a new ledger.
    #[must_use]
    pub const fn new(repo: PropagationFailureRepository, policy: RetryPolicy) -> Self {
        Self {
            repo,
            policy,
            id_gen: IdGenerator::new(),
        }
    }
}

fn attempts_of(row: &propagation_failure::Model) -> u32 {
    u32::try_from(row.attempts).unwrap_or(0)
}

#[async_trait]
impl RetryLedger for DbRetryLedger {
    async fn record(
        &self,
        account: &Account,
        community: &CommunityName,
        failure: &PropagationFailure,
    ) -> AppResult<FailureKind> {
        let now = Utc::now();
        let stored = self
            .repo
            .find_by_pair(account.as_str(), community.as_str())
            .await?;

        let row = match stored {
            Some(existing) => {
                let attempts = attempts_of(&existing).saturating_add(1);
                let kind = self.policy.escalate(Some(existing.kind), failure.kind, attempts);
                let mut model: propagation_failure::ActiveModel = existing.into();
                model.kind = Set(kind);
                model.last_error = Set(failure.message.clone());
                model.attempts = Set(i32::try_from(attempts).unwrap_or(i32::MAX));
                model.last_failed_at = Set(now.into());
                self.repo.update(model).await?
            }
            None => {
                let kind = self.policy.escalate(None, failure.kind, 1);
                self.repo
                    .create(propagation_failure::ActiveModel {
                        id: Set(self.id_gen.generate()),
                        account: Set(account.as_str().to_string()),
                        community: Set(community.as_str().to_string()),
                        kind: Set(kind),
                        last_error: Set(failure.message.clone()),
                        attempts: Set(1),
                        first_failed_at: Set(now.into()),
                        last_failed_at: Set(now.into()),
                    })
                    .await?
            }
        };

        if row.kind == FailureKind::Permanent {
            tracing::warn!(
                account = %account,
                community = %community,
                attempts = row.attempts,
                error = %row.last_error,
                "Target blocked until cleared"
            );
        }
        Ok(row.kind)
    }

    async fn resolve(&self, account: &Account, community: &CommunityName) -> AppResult<()> {
        let removed = self
            .repo
            .delete_by_pair(account.as_str(), community.as_str())
            .await?;
        if removed > 0 {
            tracing::debug!(account = %account, community = %community, "Failure resolved");
        }
        Ok(())
    }

    async fn pending(&self) -> AppResult<Vec<PendingRetry>> {
        let rows = self.repo.find_by_kind(FailureKind::Transient).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let account = Account::parse(&row.account).ok()?;
                let community = CommunityName::parse(&row.community).ok()?;
                Some(PendingRetry {
                    account,
                    community,
                    attempts: attempts_of(&row),
                    last_error: row.last_error,
                })
            })
            .collect())
    }

    async fn blocked(&self, account: &Account) -> AppResult<HashSet<CommunityName>> {
        let rows = self.repo.find_by_account(account.as_str()).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.kind == FailureKind::Permanent)
            .filter_map(|row| CommunityName::parse(&row.community).ok())
            .collect())
    }

    async fn clear(&self, account: &Account) -> AppResult<u64> {
        let removed = self.repo.delete_by_account(account.as_str()).await?;
        tracing::info!(account = %account, removed, "Failures cleared");
        Ok(removed)
    }
}
