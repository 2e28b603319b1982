//! One poll cycle.
//!
//! The coordinator drives detection, reconciliation, gateway execution and
//! the commit of registry rows, ledger entries and checkpoints. Checkpoints
//! only move after everything derived from the entries before them has been
//! recorded, so an aborted cycle is safe to repeat.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ada_common::{AppError, AppResult, Config, IdGenerator};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use super::checkpoint::CheckpointStore;
use super::detector::{ActionDetector, DetectedBatch, checkpoint_before};
use super::evidence::{EvidenceCollector, EvidenceStore};
use super::executor::GatewayExecutor;
use super::gateway::CommunityGateway;
use super::model::{
    Account, BanEvent, BanRecord, BanStatus, Checkpoint, CommunityName, ModeratedCommunity,
    RegistryDelta,
};
use super::notifier::{Notifier, PropagationOutcome};
use super::reconciler::{Disposition, ReconcileContext, Reconciler, Reconciliation};
use super::registry::{RegistrySnapshot, RegistryStore};
use super::retry_ledger::RetryLedger;

/// Phase of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Detecting,
    Reconciling,
    Executing,
    Checkpointing,
}

/// Settings the coordinator needs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub keyword: String,
    pub system_note: String,
    pub main_list: CommunityName,
    pub main_list_only: bool,
    pub full_sweep: bool,
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl TryFrom<&Config> for CoordinatorConfig {
    type Error = AppError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        if config.bot.keyword.trim().is_empty() {
            return Err(AppError::Config("bot.keyword must not be empty".to_string()));
        }
        let main_list = CommunityName::parse(&config.bot.main_list_community)
            .map_err(|e| AppError::Config(format!("bot.main_list_community: {e}")))?;
        Ok(Self {
            keyword: config.bot.keyword.clone(),
            system_note: config.bot.system_note.clone(),
            main_list,
            main_list_only: config.bot.main_list_only,
            full_sweep: config.bot.full_sweep,
            concurrency: config.worker.concurrency,
            call_timeout: Duration::from_secs(config.worker.call_timeout_secs),
        })
    }
}

/// Why an existing row is reconciled outside of a new ban event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Targets whose last ban failed transiently.
    Retry,
    /// Active rows against a newly onboarded or fully swept community.
    Sweep,
    /// Rows a moderator switched back to active or whose reconcile time
    /// was edited by hand.
    Relist,
}

impl Pass {
    /// Whether satisfied targets drop their ledger rows.
    const fn resolves_satisfied(self) -> bool {
        matches!(self, Self::Retry | Self::Relist)
    }
}

/// Counters of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub run_id: String,
    pub communities: usize,
    pub entries_scanned: usize,
    pub events: usize,
    pub bans_applied: usize,
    pub already_satisfied: usize,
    pub failures: usize,
    pub retried: usize,
    pub relisted: usize,
    pub swept: usize,
    pub communities_advanced: usize,
    pub detection_errors: usize,
    pub cancelled: bool,
}

impl CycleReport {
    fn absorb(&mut self, delta: &RegistryDelta) {
        self.bans_applied += delta.applied.len();
        self.already_satisfied += delta.satisfied.len();
        self.failures += delta.failed.len();
    }
}

/// State shared by every step of one cycle.
struct Cycle {
    communities: Vec<ModeratedCommunity>,
    protected: HashSet<Account>,
    report: CycleReport,
}

/// Runs poll cycles.
pub struct RunCoordinator {
    config: CoordinatorConfig,
    gateway: Arc<dyn CommunityGateway>,
    registry: Arc<dyn RegistryStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    ledger: Arc<dyn RetryLedger>,
    reconciler: Reconciler,
    executor: GatewayExecutor,
    evidence: EvidenceCollector,
    notifier: Notifier,
    state: Mutex<RunState>,
    id_gen: IdGenerator,
}

impl RunCoordinator {
    /// Wire a coordinator.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        gateway: Arc<dyn CommunityGateway>,
        registry: Arc<dyn RegistryStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn RetryLedger>,
        evidence_store: Arc<dyn EvidenceStore>,
    ) -> Self {
        let executor = GatewayExecutor::new(
            gateway.clone(),
            config.concurrency,
            config.call_timeout,
            config.system_note.clone(),
        );
        let evidence = EvidenceCollector::new(gateway.clone(), executor.clone(), evidence_store);
        let notifier = Notifier::new(gateway.clone(), executor.clone(), config.main_list.clone());

        Self {
            reconciler: Reconciler::new(config.main_list_only),
            config,
            gateway,
            registry,
            checkpoints,
            ledger,
            executor,
            evidence,
            notifier,
            state: Mutex::new(RunState::Idle),
            id_gen: IdGenerator::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "Run state");
            *state = next;
        }
    }

    /// Run one cycle. `shutdown` is checked between communities.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> AppResult<CycleReport> {
        let run_id = self.id_gen.generate_run_id();
        tracing::info!(run_id = %run_id, "Cycle started");

        let result = self.run(run_id, shutdown).await;
        self.transition(RunState::Idle);

        match &result {
            Ok(report) => tracing::info!(
                run_id = %report.run_id,
                communities = report.communities,
                events = report.events,
                applied = report.bans_applied,
                satisfied = report.already_satisfied,
                failures = report.failures,
                retried = report.retried,
                relisted = report.relisted,
                advanced = report.communities_advanced,
                cancelled = report.cancelled,
                "Cycle finished"
            ),
            Err(e) => tracing::error!(error = %e, code = e.error_code(), "Cycle aborted"),
        }
        result
    }

    async fn run(&self, run_id: String, shutdown: &watch::Receiver<bool>) -> AppResult<CycleReport> {
        self.transition(RunState::Detecting);

        let previous = self.registry.snapshot();
        let snapshot = self.registry.refresh().await?;
        tracing::debug!(records = snapshot.len(), "Registry loaded");
        let relisted = relisted(&previous, &snapshot);

        let bot = self
            .executor
            .timed("bot account", self.gateway.bot_account())
            .await?;
        let mut cycle = self.begin(&bot).await?;
        cycle.report.run_id = run_id;

        self.relist_pass(&mut cycle, relisted).await?;
        self.retry_pass(&mut cycle).await?;

        let detector = ActionDetector::new(
            self.gateway.clone(),
            self.config.keyword.clone(),
            self.config.system_note.clone(),
            bot,
        );
        let mut batches: Vec<(ModeratedCommunity, AppResult<DetectedBatch>)> =
            stream::iter(cycle.communities.clone())
                .map(|community| {
                    let detector = &detector;
                    async move {
                        let batch = self
                            .executor
                            .timed(
                                "moderation log",
                                detector.detect(&community.name, community.checkpoint),
                            )
                            .await;
                        (community, batch)
                    }
                })
                .buffer_unordered(self.executor.concurrency())
                .collect()
                .await;
        batches.sort_by(|a, b| a.0.name.cmp(&b.0.name));

        for (community, batch) in batches {
            if *shutdown.borrow() {
                tracing::info!(community = %community.name, "Shutdown requested, stopping cycle");
                cycle.report.cancelled = true;
                break;
            }
            match batch {
                Ok(batch) => self.process_community(&mut cycle, &community, &batch).await?,
                Err(e) => {
                    cycle.report.detection_errors += 1;
                    tracing::error!(
                        community = %community.name,
                        error = %e,
                        "Failed to read moderation log"
                    );
                }
            }
        }

        Ok(cycle.report)
    }

    /// Resolve the moderated communities and the protected accounts.
    async fn begin(&self, bot: &Account) -> AppResult<Cycle> {
        let names = self
            .executor
            .timed("moderated communities", self.gateway.list_moderated_communities())
            .await?;
        let stored = self.checkpoints.get_all().await?;

        let mut communities: Vec<ModeratedCommunity> = names
            .into_iter()
            .map(|name| ModeratedCommunity {
                checkpoint: stored.get(&name).copied(),
                is_main_list: name == self.config.main_list,
                name,
            })
            .collect();
        communities.sort_by(|a, b| a.name.cmp(&b.name));
        communities.dedup_by(|a, b| a.name == b.name);

        let moderators: Vec<AppResult<Vec<Account>>> = stream::iter(communities.iter().map(|c| c.name.clone()).collect::<Vec<_>>())
            .map(|name| async move {
                self.executor
                    .timed("moderators", self.gateway.list_moderators(&name))
                    .await
            })
            .buffer_unordered(self.executor.concurrency())
            .collect()
            .await;

        let mut protected: HashSet<Account> = HashSet::from([bot.clone()]);
        for list in moderators {
            protected.extend(list?);
        }

        tracing::debug!(
            communities = communities.len(),
            protected = protected.len(),
            "Moderation scope resolved"
        );

        Ok(Cycle {
            report: CycleReport {
                communities: communities.len(),
                ..CycleReport::default()
            },
            communities,
            protected,
        })
    }

    /// Forget the failures of relisted rows and propagate them again.
    async fn relist_pass(&self, cycle: &mut Cycle, records: Vec<BanRecord>) -> AppResult<()> {
        for record in records {
            if cycle.protected.contains(&record.account) {
                continue;
            }
            let cleared = self.ledger.clear(&record.account).await?;
            let targets = self
                .reconciler
                .targets_for(Some(&record.source_community), &cycle.communities);
            tracing::info!(
                account = %record.account,
                cleared,
                targets = targets.len(),
                "Registry row relisted by hand, propagating again"
            );
            cycle.report.relisted += 1;
            self.process_targets(cycle, &record, &targets, Pass::Relist)
                .await?;
        }
        Ok(())
    }

    /// Retry targets whose last ban failed transiently.
    async fn retry_pass(&self, cycle: &mut Cycle) -> AppResult<()> {
        let pending = self.ledger.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        self.transition(RunState::Reconciling);

        let mut by_account: BTreeMap<Account, Vec<CommunityName>> = BTreeMap::new();
        for retry in pending {
            by_account
                .entry(retry.account)
                .or_default()
                .push(retry.community);
        }

        let moderated: HashSet<CommunityName> =
            cycle.communities.iter().map(|c| c.name.clone()).collect();

        for (account, communities) in by_account {
            let record = self.registry.get(&account).await?;
            let (targets, gone): (Vec<CommunityName>, Vec<CommunityName>) = communities
                .into_iter()
                .partition(|c| moderated.contains(c));

            let abandon = match &record {
                Some(r) if r.status == BanStatus::Active => gone,
                _ => targets.iter().chain(gone.iter()).cloned().collect(),
            };
            for community in &abandon {
                self.ledger.resolve(&account, community).await?;
            }

            let Some(record) = record.filter(BanRecord::is_active) else {
                tracing::debug!(account = %account, "Dropping retries of inactive account");
                continue;
            };
            if targets.is_empty() {
                continue;
            }

            tracing::info!(account = %account, targets = targets.len(), "Retrying failed bans");
            cycle.report.retried += targets.len();
            self.process_targets(cycle, &record, &targets, Pass::Retry)
                .await?;
        }
        Ok(())
    }

    /// Handle one community's batch, then move its checkpoint.
    async fn process_community(
        &self,
        cycle: &mut Cycle,
        community: &ModeratedCommunity,
        batch: &DetectedBatch,
    ) -> AppResult<()> {
        cycle.report.entries_scanned += batch.scanned();

        let mut stopped_at: Option<(Checkpoint, AppError)> = None;
        for event in batch.events() {
            cycle.report.events += 1;
            if let Err(e) = self.process_event(cycle, &event).await {
                tracing::error!(
                    account = %event.account,
                    community = %event.community,
                    error = %e,
                    "Failed to commit ban event"
                );
                stopped_at = Some((checkpoint_before(event.timestamp), e));
                break;
            }
        }

        let sweep =
            stopped_at.is_none() && (community.checkpoint.is_none() || self.config.full_sweep);
        if sweep && let Err(e) = self.sweep(cycle, community).await {
            tracing::error!(community = %community.name, error = %e, "Sweep failed");
            if e.is_fatal() {
                return Err(e);
            }
            if community.checkpoint.is_none() {
                return Ok(());
            }
        }

        self.transition(RunState::Checkpointing);
        let (target, fatal) = match stopped_at {
            Some((checkpoint, e)) => (
                // Onboarding is repeated until it completes.
                community.checkpoint.map(|_| checkpoint),
                e.is_fatal().then_some(e),
            ),
            None => (
                batch.scanned_through().or_else(|| {
                    community
                        .checkpoint
                        .is_none()
                        .then(|| batch.onboarding_checkpoint())
                }),
                None,
            ),
        };

        if let Some(target) = target.filter(|t| community.checkpoint.is_none_or(|cp| *t > cp)) {
            match self.checkpoints.advance(&community.name, target).await {
                Ok(stored) => {
                    cycle.report.communities_advanced += 1;
                    tracing::debug!(
                        community = %community.name,
                        checkpoint = %stored.0,
                        "Checkpoint advanced"
                    );
                }
                Err(e) => tracing::error!(
                    community = %community.name,
                    error = %e,
                    "Failed to store checkpoint"
                ),
            }
        }

        fatal.map_or(Ok(()), Err)
    }

    /// Reconcile, execute and commit one ban event.
    async fn process_event(&self, cycle: &mut Cycle, event: &BanEvent) -> AppResult<()> {
        self.transition(RunState::Reconciling);
        let record = self.registry.get(&event.account).await?;

        let needs_lookup = !cycle.protected.contains(&event.account)
            && record.as_ref().is_none_or(BanRecord::is_active);
        let (live, blocked) = if needs_lookup {
            let targets = self
                .reconciler
                .targets_for(Some(&event.community), &cycle.communities);
            (
                self.executor.live_state(&event.account, &targets).await,
                self.ledger.blocked(&event.account).await?,
            )
        } else {
            (HashMap::new(), HashSet::new())
        };

        let ctx = ReconcileContext {
            communities: &cycle.communities,
            protected: &cycle.protected,
            live: &live,
            blocked: &blocked,
            now: Utc::now(),
        };
        let recon = self.reconciler.reconcile(event, record.as_ref(), &ctx);

        let Some(mut delta) = recon.delta.clone() else {
            tracing::info!(
                account = %event.account,
                community = %event.community,
                "Skipping ban of a moderator"
            );
            return Ok(());
        };

        if recon.disposition == Disposition::Ignored {
            tracing::info!(account = %event.account, "Account is on the ignore list");
            self.commit(&delta).await?;
            return Ok(());
        }

        self.execute(&recon, &mut delta).await;

        let mut evidence_body = None;
        if record.is_none() {
            match self.evidence.collect(event).await {
                Ok(report) => {
                    delta.evidence_ref = Some(report.id);
                    evidence_body = Some(report.body);
                }
                Err(e) => tracing::warn!(
                    account = %event.account,
                    error = %e,
                    "Failed to collect evidence"
                ),
            }
        }

        self.commit(&delta).await?;
        self.record_ledger(&delta, &settled(&delta, &blocked, false))
            .await?;
        cycle.report.absorb(&delta);

        tracing::info!(
            account = %event.account,
            source = %event.community,
            moderator = %event.moderator,
            applied = delta.applied.len(),
            failed = delta.failed.len(),
            "Ban propagated"
        );

        let outcome = PropagationOutcome::new(&recon, &delta);
        self.notifier
            .notify(
                &event.moderator,
                &event.account,
                &event.community,
                evidence_body.as_deref(),
                &outcome,
            )
            .await;
        Ok(())
    }

    /// Reconcile active rows against a community without a new event.
    async fn sweep(&self, cycle: &mut Cycle, community: &ModeratedCommunity) -> AppResult<()> {
        let targets = self
            .reconciler
            .targets_for(None, std::slice::from_ref(community));
        if targets.is_empty() {
            return Ok(());
        }

        let records: Vec<BanRecord> = self.registry.list(BanStatus::Active).await?;
        tracing::info!(
            community = %community.name,
            records = records.len(),
            "Sweeping registry"
        );
        for record in records {
            cycle.report.swept += 1;
            self.process_targets(cycle, &record, &targets, Pass::Sweep)
                .await?;
        }
        Ok(())
    }

    /// Reconcile an existing row against explicit targets.
    async fn process_targets(
        &self,
        cycle: &mut Cycle,
        record: &BanRecord,
        targets: &[CommunityName],
        pass: Pass,
    ) -> AppResult<()> {
        self.transition(RunState::Reconciling);
        if cycle.protected.contains(&record.account) {
            return Ok(());
        }
        let live = self.executor.live_state(&record.account, targets).await;
        let blocked = self.ledger.blocked(&record.account).await?;
        let ctx = ReconcileContext {
            communities: &cycle.communities,
            protected: &cycle.protected,
            live: &live,
            blocked: &blocked,
            now: Utc::now(),
        };

        let recon = self.reconciler.reconcile_targets(record, targets, &ctx);
        let Some(mut delta) = recon.delta.clone() else {
            return Ok(());
        };
        let settled = settled(&delta, &blocked, pass.resolves_satisfied());
        if recon.bans().next().is_none() && settled.is_empty() && pass != Pass::Relist {
            return Ok(());
        }

        self.execute(&recon, &mut delta).await;
        if pass == Pass::Relist || !delta.applied.is_empty() || !delta.failed.is_empty() {
            self.commit(&delta).await?;
        }
        self.record_ledger(&delta, &settled).await?;
        cycle.report.absorb(&delta);
        Ok(())
    }

    async fn execute(&self, recon: &Reconciliation, delta: &mut RegistryDelta) {
        if recon.bans().next().is_none() {
            return;
        }
        self.transition(RunState::Executing);
        for (community, result) in self.executor.apply_bans(recon.bans()).await {
            delta.record_result(community, &result);
        }
    }

    async fn commit(&self, delta: &RegistryDelta) -> AppResult<()> {
        match self.registry.upsert(delta).await {
            Ok(_) => Ok(()),
            Err(AppError::PageTooLarge(detail)) => {
                self.notifier
                    .alert_operators(
                        "ADA main list page is full",
                        &format!(
                            "The main list page could not be saved while adding u/{}: {detail}\n\n\
                             Archive or remove old rows so propagation can continue.",
                            delta.account
                        ),
                    )
                    .await;
                Err(AppError::PageTooLarge(detail))
            }
            Err(e) => Err(e),
        }
    }

    async fn record_ledger(&self, delta: &RegistryDelta, settled: &[CommunityName]) -> AppResult<()> {
        for community in delta.applied.iter().chain(settled) {
            self.ledger.resolve(&delta.account, community).await?;
        }
        for (community, failure) in &delta.failed {
            self.ledger.record(&delta.account, community, failure).await?;
        }
        Ok(())
    }
}

/// Satisfied targets whose ledger rows are stale. A target found banned
/// is settled even when a permanent failure was on record for it.
fn settled(
    delta: &RegistryDelta,
    blocked: &HashSet<CommunityName>,
    all: bool,
) -> Vec<CommunityName> {
    delta
        .satisfied
        .iter()
        .filter(|c| all || blocked.contains(*c))
        .cloned()
        .collect()
}

/// Active rows to propagate again: rows switched back from ignored, rows
/// whose reconcile time was edited since the last refresh, and rows
/// without a reconcile time.
fn relisted(previous: &RegistrySnapshot, current: &RegistrySnapshot) -> Vec<BanRecord> {
    current
        .records(BanStatus::Active)
        .filter(|r| {
            r.last_reconciled_at.is_none()
                || previous.get(&r.account).is_some_and(|p| {
                    p.status == BanStatus::Ignored || p.last_reconciled_at != r.last_reconciled_at
                })
        })
        .cloned()
        .collect()
}
