//! Propagation decision engine.
//!
//! The reconciler is pure: it reads the registry row, the observed live
//! state and the retry ledger's blocked targets, and proposes gateway
//! actions and a registry delta. It never performs I/O.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::model::{
    Account, ActionKind, BanEvent, BanRecord, BanStatus, CommunityName, LiveState,
    ModeratedCommunity, RegistryDelta, RequiredAction,
};

/// Everything the reconciler reads besides the event and the record.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    /// Communities this bot moderates.
    pub communities: &'a [ModeratedCommunity],
    /// Accounts that are never propagated.
    pub protected: &'a HashSet<Account>,
    /// Observed ban state per target community. Missing means unknown.
    pub live: &'a HashMap<CommunityName, LiveState>,
    /// Targets held back by an unresolved permanent failure.
    pub blocked: &'a HashSet<CommunityName>,
    pub now: DateTime<Utc>,
}

/// How an account was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Propagate,
    Ignored,
    Protected,
}

/// Result of reconciling one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub disposition: Disposition,
    pub actions: Vec<RequiredAction>,
    pub delta: Option<RegistryDelta>,
}

impl Reconciliation {
    fn protected() -> Self {
        Self {
            disposition: Disposition::Protected,
            actions: Vec::new(),
            delta: None,
        }
    }

    /// Actions that need a gateway call.
    pub fn bans(&self) -> impl Iterator<Item = &RequiredAction> {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::ApplyBan)
    }

    /// Targets with the given decision.
    #[must_use]
    pub fn targets(&self, kind: ActionKind) -> Vec<CommunityName> {
        self.actions
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.target_community.clone())
            .collect()
    }
}

/// Decides, per account and target community, what has to happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    main_list_only: bool,
}

impl Reconciler {
    /// Create a reconciler. With `main_list_only` the main-list community
    /// hosts the registry but is never a ban target.
    #[must_use]
    pub const fn new(main_list_only: bool) -> Self {
        Self { main_list_only }
    }

    /// Target communities for a ban that originated on `origin`.
    #[must_use]
    pub fn targets_for(
        &self,
        origin: Option<&CommunityName>,
        communities: &[ModeratedCommunity],
    ) -> Vec<CommunityName> {
        communities
            .iter()
            .filter(|c| origin != Some(&c.name))
            .filter(|c| !(self.main_list_only && c.is_main_list))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Reconcile a freshly detected ban.
    #[must_use]
    pub fn reconcile(
        &self,
        event: &BanEvent,
        record: Option<&BanRecord>,
        ctx: &ReconcileContext<'_>,
    ) -> Reconciliation {
        if ctx.protected.contains(&event.account) {
            return Reconciliation::protected();
        }

        let mut delta = RegistryDelta {
            account: event.account.clone(),
            source_community: event.community.clone(),
            first_seen_at: event.timestamp,
            reconciled_at: ctx.now,
            activate: true,
            evidence_ref: None,
            applied: BTreeSet::new(),
            satisfied: BTreeSet::new(),
            failed: BTreeMap::new(),
        };

        if record.is_some_and(|r| r.status == BanStatus::Ignored) {
            delta.activate = false;
            return Reconciliation {
                disposition: Disposition::Ignored,
                actions: Vec::new(),
                delta: Some(delta),
            };
        }

        let targets = self.targets_for(Some(&event.community), ctx.communities);
        let actions = decide(&event.account, targets, ctx);
        delta.satisfied = satisfied(&actions);

        Reconciliation {
            disposition: Disposition::Propagate,
            actions,
            delta: Some(delta),
        }
    }

    /// Reconcile an existing row against an explicit target list.
    ///
    /// Used for retries and sweeps. Ignored rows yield one `SkipIgnored`
    /// per target and no delta.
    #[must_use]
    pub fn reconcile_targets(
        &self,
        record: &BanRecord,
        targets: &[CommunityName],
        ctx: &ReconcileContext<'_>,
    ) -> Reconciliation {
        if ctx.protected.contains(&record.account) {
            return Reconciliation::protected();
        }

        if record.status == BanStatus::Ignored {
            return Reconciliation {
                disposition: Disposition::Ignored,
                actions: targets
                    .iter()
                    .map(|t| RequiredAction {
                        account: record.account.clone(),
                        target_community: t.clone(),
                        kind: ActionKind::SkipIgnored,
                    })
                    .collect(),
                delta: None,
            };
        }

        let actions = decide(&record.account, targets.iter().cloned(), ctx);
        let delta = RegistryDelta {
            account: record.account.clone(),
            source_community: record.source_community.clone(),
            first_seen_at: record.first_seen_at,
            reconciled_at: ctx.now,
            activate: false,
            evidence_ref: record.evidence_ref.clone(),
            applied: BTreeSet::new(),
            satisfied: satisfied(&actions),
            failed: BTreeMap::new(),
        };

        Reconciliation {
            disposition: Disposition::Propagate,
            actions,
            delta: Some(delta),
        }
    }
}

fn decide(
    account: &Account,
    targets: impl IntoIterator<Item = CommunityName>,
    ctx: &ReconcileContext<'_>,
) -> Vec<RequiredAction> {
    targets
        .into_iter()
        .map(|target| {
            // A target already banned on the platform is satisfied even
            // when a permanent failure is on record for it.
            let kind = if ctx.live.get(&target) == Some(&LiveState::Banned) {
                ActionKind::AlreadySatisfied
            } else if ctx.blocked.contains(&target) {
                ActionKind::SkipBlocked
            } else {
                ActionKind::ApplyBan
            };
            RequiredAction {
                account: account.clone(),
                target_community: target,
                kind,
            }
        })
        .collect()
}

fn satisfied(actions: &[RequiredAction]) -> BTreeSet<CommunityName> {
    actions
        .iter()
        .filter(|a| a.kind == ActionKind::AlreadySatisfied)
        .map(|a| a.target_community.clone())
        .collect()
}
