//! Reports propagation results to moderators.
//!
//! Delivery is best-effort. A failed message is logged and never undoes a
//! committed ban or registry row.

use std::sync::Arc;

use super::executor::GatewayExecutor;
use super::gateway::CommunityGateway;
use super::model::{Account, ActionKind, CommunityName, RegistryDelta};
use super::reconciler::Reconciliation;

/// Per-community result of one propagation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationOutcome {
    pub applied: Vec<CommunityName>,
    pub satisfied: Vec<CommunityName>,
    /// Held back by a permanent failure recorded earlier.
    pub skipped: Vec<CommunityName>,
    pub failed: Vec<(CommunityName, String)>,
}

impl PropagationOutcome {
    /// Summarize a reconciliation after its bans have run.
    #[must_use]
    pub fn new(reconciliation: &Reconciliation, delta: &RegistryDelta) -> Self {
        Self {
            applied: delta.applied.iter().cloned().collect(),
            satisfied: delta.satisfied.iter().cloned().collect(),
            skipped: reconciliation.targets(ActionKind::SkipBlocked),
            failed: delta
                .failed
                .iter()
                .map(|(c, f)| (c.clone(), f.message.clone()))
                .collect(),
        }
    }

    /// Whether any target failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

fn community_list(communities: &[CommunityName]) -> String {
    if communities.is_empty() {
        return "none".to_string();
    }
    communities
        .iter()
        .map(|c| format!("r/{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the subject and body of a propagation report.
#[must_use]
pub fn compose(
    account: &Account,
    source: &CommunityName,
    outcome: &PropagationOutcome,
    evidence: Option<&str>,
) -> (String, String) {
    let subject = format!("ADA: u/{account} added to the main list");

    let mut body = format!(
        "u/{account}, banned on r/{source}, was added to the ADA main list.\n\n\
         * Banned on: {}\n\
         * Already banned on: {}\n",
        community_list(&outcome.applied),
        community_list(&outcome.satisfied),
    );
    if !outcome.skipped.is_empty() {
        body.push_str(&format!(
            "* Skipped after an earlier permanent failure: {}\n",
            community_list(&outcome.skipped)
        ));
    }
    if outcome.has_failures() {
        body.push_str("* Failed, not banned:\n");
        for (community, reason) in &outcome.failed {
            body.push_str(&format!("    * r/{community}: {reason}\n"));
        }
    }
    if let Some(evidence) = evidence {
        body.push_str("\n---\n\n");
        body.push_str(evidence);
    }
    (subject, body)
}

/// Sends reports and operator alerts.
#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn CommunityGateway>,
    executor: GatewayExecutor,
    operators: CommunityName,
}

impl Notifier {
    /// Create a notifier. Operator alerts go to the moderators of
    /// `operators`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommunityGateway>,
        executor: GatewayExecutor,
        operators: CommunityName,
    ) -> Self {
        Self {
            gateway,
            executor,
            operators,
        }
    }

    /// Report a propagation to the moderator who banned the account.
    pub async fn notify(
        &self,
        moderator: &Account,
        account: &Account,
        source: &CommunityName,
        evidence: Option<&str>,
        outcome: &PropagationOutcome,
    ) {
        let (subject, body) = compose(account, source, outcome, evidence);
        let result = self
            .executor
            .timed("report", self.gateway.send_message(moderator, &subject, &body))
            .await;
        match result {
            Ok(()) => tracing::debug!(moderator = %moderator, account = %account, "Report sent"),
            Err(e) => tracing::warn!(
                moderator = %moderator,
                account = %account,
                error = %e,
                "Failed to send report"
            ),
        }
    }

    /// Message the operators of the main list.
    pub async fn alert_operators(&self, subject: &str, body: &str) {
        let result = self
            .executor
            .timed(
                "operator alert",
                self.gateway.message_community(&self.operators, subject, body),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(community = %self.operators, error = %e, "Failed to alert operators");
        }
    }
}
