//! Bounded, timed-out gateway calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ada_common::{AppError, AppResult};
use futures::stream::{self, StreamExt};

use super::gateway::CommunityGateway;
use super::model::{Account, CommunityName, LiveState, RequiredAction};

/// Runs per-target gateway calls concurrently.
#[derive(Clone)]
pub struct GatewayExecutor {
    gateway: Arc<dyn CommunityGateway>,
    concurrency: usize,
    call_timeout: Duration,
    system_note: String,
}

impl GatewayExecutor {
    /// Create a new executor.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommunityGateway>,
        concurrency: usize,
        call_timeout: Duration,
        system_note: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            concurrency: concurrency.max(1),
            call_timeout,
            system_note: system_note.into(),
        }
    }

    /// Maximum number of calls in flight.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run a gateway call under the call timeout.
    ///
    /// A timeout is reported as a transient gateway failure.
    pub async fn timed<T, F>(&self, what: &str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
    {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(AppError::TransientGateway(format!(
                    "{what} timed out after {}s",
                    self.call_timeout.as_secs()
                )))
            })
    }

    /// Observe whether `account` is banned on each target.
    ///
    /// Failed lookups are `LiveState::Unknown`.
    pub async fn live_state(
        &self,
        account: &Account,
        targets: &[CommunityName],
    ) -> HashMap<CommunityName, LiveState> {
        stream::iter(targets.iter().cloned())
            .map(|target| async move {
                let result = self
                    .timed("ban lookup", self.gateway.is_banned(&target, account))
                    .await;
                let state = match result {
                    Ok(true) => LiveState::Banned,
                    Ok(false) => LiveState::NotBanned,
                    Err(e) => {
                        tracing::debug!(
                            account = %account,
                            community = %target,
                            error = %e,
                            "Ban lookup failed"
                        );
                        LiveState::Unknown
                    }
                };
                (target, state)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Apply every ban with the system note. One result per action.
    pub async fn apply_bans<'a, I>(&self, actions: I) -> Vec<(CommunityName, AppResult<()>)>
    where
        I: IntoIterator<Item = &'a RequiredAction>,
    {
        let actions: Vec<RequiredAction> = actions.into_iter().cloned().collect();
        stream::iter(actions)
            .map(|action| async move {
                let result = self
                    .timed(
                        "ban",
                        self.gateway.apply_ban(
                            &action.target_community,
                            &action.account,
                            &self.system_note,
                        ),
                    )
                    .await;
                match &result {
                    Ok(()) => tracing::info!(
                        account = %action.account,
                        community = %action.target_community,
                        "Ban applied"
                    ),
                    Err(e) => tracing::warn!(
                        account = %action.account,
                        community = %action.target_community,
                        error = %e,
                        code = e.error_code(),
                        "Ban failed"
                    ),
                }
                (action.target_community.clone(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
