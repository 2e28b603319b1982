//! Propagation cycle integration tests.
//!
//! These tests drive full poll cycles against the in-memory gateway and
//! stores and check the registry page, bans, ledger and checkpoints.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use ada_common::AppError;
use ada_core::test_utils::{
    FakeGateway, MemoryCheckpointStore, MemoryEvidenceStore, MemoryRetryLedger,
};
use ada_core::{
    Account, AccountStanding, BanRecord, BanStatus, CheckpointStore, CommunityName, CoordinatorConfig,
    CycleReport, FailureKind, PageRegistryStore, RegistryPage, RegistryStore, RetryPolicy,
    RunCoordinator,
};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

const SYSTEM_NOTE: &str = "Banned from ADA main list.";
const MAIN: &str = "adalist";
const PAGE_ID: &str = "ada_config";

struct Harness {
    gateway: Arc<FakeGateway>,
    registry: Arc<PageRegistryStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
    ledger: Arc<MemoryRetryLedger>,
    evidence: Arc<MemoryEvidenceStore>,
    coordinator: RunCoordinator,
    shutdown: watch::Receiver<bool>,
    _shutdown_tx: watch::Sender<bool>,
}

fn config(keyword: &str, full_sweep: bool) -> CoordinatorConfig {
    CoordinatorConfig {
        keyword: keyword.to_string(),
        system_note: SYSTEM_NOTE.to_string(),
        main_list: CommunityName::parse(MAIN).unwrap(),
        main_list_only: true,
        full_sweep,
        concurrency: 4,
        call_timeout: Duration::from_secs(5),
    }
}

impl Harness {
    fn with_config(gateway: Arc<FakeGateway>, config: CoordinatorConfig) -> Self {
        let registry = Arc::new(PageRegistryStore::new(
            gateway.clone(),
            CommunityName::parse(MAIN).unwrap(),
            PAGE_ID,
        ));
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let ledger = Arc::new(MemoryRetryLedger::new(RetryPolicy::new(3)));
        let evidence = Arc::new(MemoryEvidenceStore::new());
        let coordinator = RunCoordinator::new(
            config,
            gateway.clone(),
            registry.clone(),
            checkpoints.clone(),
            ledger.clone(),
            evidence.clone(),
        );
        let (tx, rx) = watch::channel(false);
        Self {
            gateway,
            registry,
            checkpoints,
            ledger,
            evidence,
            coordinator,
            shutdown: rx,
            _shutdown_tx: tx,
        }
    }

    /// Three ordinary communities plus the list community, all onboarded.
    async fn new() -> Self {
        let h = Self::with_config(gateway(), config("ADA", false));
        h.cycle().await;
        h
    }

    async fn cycle(&self) -> CycleReport {
        self.coordinator.run_cycle(&self.shutdown).await.unwrap()
    }

    fn ban_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.gateway.bans().into_iter().map(|b| b.0).collect();
        targets.sort();
        targets
    }

    fn page(&self) -> RegistryPage {
        RegistryPage::parse(&self.gateway.page(MAIN, PAGE_ID).unwrap()).unwrap()
    }

    /// Change a row on the page by hand, the way a moderator would.
    fn edit_row(&self, name: &str, edit: impl FnOnce(&mut BanRecord)) {
        let mut page = self.page();
        let mut row = page.get(&account(name)).unwrap().clone();
        edit(&mut row);
        page.upsert(row);
        self.gateway.set_page(MAIN, PAGE_ID, &page.render());
    }

    async fn checkpoint(&self, community: &str) -> Option<DateTime<Utc>> {
        self.checkpoints
            .get(&CommunityName::parse(community).unwrap())
            .await
            .unwrap()
            .map(|cp| cp.0)
    }
}

fn gateway() -> Arc<FakeGateway> {
    let gateway = Arc::new(FakeGateway::new());
    gateway.add_community("a", &["mod_a"]);
    gateway.add_community("b", &["mod_b"]);
    gateway.add_community("c", &["mod_c"]);
    gateway.add_community(MAIN, &["mod_a"]);
    gateway
}

/// A log timestamp safely after every onboarding checkpoint.
fn later(secs: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(secs)
}

fn account(name: &str) -> Account {
    Account::parse(name).unwrap()
}

#[tokio::test]
async fn test_tagged_ban_propagates_to_other_communities() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let report = h.cycle().await;

    assert_eq!(report.events, 1);
    assert_eq!(report.bans_applied, 2);
    assert_eq!(h.ban_targets(), vec!["b", "c"]);
    assert!(h.gateway.bans().iter().all(|b| b.2 == SYSTEM_NOTE));
    assert!(!h.gateway.is_banned_in(MAIN, "spambot1"));

    let page = h.page();
    let row = page.get(&account("spambot1")).unwrap();
    assert_eq!(row.status, BanStatus::Active);
    assert_eq!(row.source_community.as_str(), "a");
    assert!(row.last_reconciled_at.is_some());
}

#[tokio::test]
async fn test_report_and_evidence_reach_moderator() {
    let h = Harness::new().await;
    h.gateway.set_activity("spambot1", AccountStanding::Suspended);
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    h.cycle().await;

    let reports = h.evidence.reports();
    assert_eq!(reports.len(), 1);
    let row = h.page().get(&account("spambot1")).unwrap().clone();
    assert_eq!(row.evidence_ref.as_deref(), Some(reports[0].id.as_str()));

    let messages = h.gateway.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].recipient, "mod_a");
    assert!(messages[0].body.contains("Banned on: r/b, r/c"));
    assert!(messages[0].body.contains("likely already suspended"));
}

#[tokio::test]
async fn test_existing_bans_are_satisfied_not_reapplied() {
    let h = Harness::new().await;
    h.gateway.set_banned("b", "spambot1");
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let report = h.cycle().await;

    assert_eq!(report.already_satisfied, 1);
    assert_eq!(h.ban_targets(), vec!["c"]);
}

#[tokio::test]
async fn test_second_cycle_only_fills_gaps() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;
    assert_eq!(h.gateway.ban_attempts(), 2);

    // Nothing new: nothing happens.
    let report = h.cycle().await;
    assert_eq!(report.events, 0);
    assert_eq!(h.gateway.ban_attempts(), 2);

    // Another moderator tags the same account after c lifted its ban.
    h.gateway.unban("c", "spambot1");
    h.gateway
        .push_log("b", "spambot1", "mod_b", Some("ADA again"), later(2));
    let report = h.cycle().await;

    assert_eq!(report.events, 1);
    assert_eq!(report.bans_applied, 1);
    assert_eq!(report.already_satisfied, 1);
    assert_eq!(h.gateway.ban_attempts(), 3);
    assert!(h.gateway.is_banned_in("c", "spambot1"));
    assert_eq!(
        h.page().get(&account("spambot1")).unwrap().source_community.as_str(),
        "a"
    );
}

#[tokio::test]
async fn test_ignored_account_is_left_alone() {
    let h = Harness::new().await;
    let text = h.gateway.page(MAIN, PAGE_ID).unwrap()
        + "| TrollAcct | ignored | a | 2024-01-01T00:00:00Z |  |  |\n";
    h.gateway.set_page(MAIN, PAGE_ID, &text);
    let before = h.page().get(&account("trollacct")).unwrap().clone();
    assert_eq!(before.status, BanStatus::Ignored);

    for (community, moderator) in [("b", "mod_b"), ("c", "mod_c")] {
        h.gateway
            .push_log(community, "trollacct", moderator, Some("ADA"), later(1));
    }
    let report = h.cycle().await;

    assert_eq!(report.events, 2);
    assert_eq!(h.gateway.ban_attempts(), 0);
    assert!(!h.gateway.is_banned_in("a", "trollacct"));
    assert!(h.gateway.messages().is_empty());

    let after = h.page().get(&account("trollacct")).unwrap().clone();
    assert_eq!(after.status, BanStatus::Ignored);
    assert_eq!(after.source_community, before.source_community);
    assert_eq!(after.first_seen_at, before.first_seen_at);
    assert!(before.last_reconciled_at.is_none());
    assert!(after.last_reconciled_at.is_some());
}

#[tokio::test]
async fn test_status_flip_through_store() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "trollacct", "mod_a", Some("ADA"), later(1));
    h.cycle().await;

    h.registry
        .set_status(&account("trollacct"), BanStatus::Ignored)
        .await
        .unwrap();
    assert_eq!(
        h.page().get(&account("trollacct")).unwrap().status,
        BanStatus::Ignored
    );

    let attempts = h.gateway.ban_attempts();
    h.gateway.unban("b", "trollacct");
    h.gateway
        .push_log("c", "trollacct", "mod_c", Some("ADA"), later(2));
    h.cycle().await;
    assert_eq!(h.gateway.ban_attempts(), attempts);
    assert!(!h.gateway.is_banned_in("b", "trollacct"));
}

#[tokio::test]
async fn test_reactivated_row_is_propagated_again() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;

    h.edit_row("spambot1", |r| r.status = BanStatus::Ignored);
    assert_eq!(h.cycle().await.relisted, 0);

    // c lifted its ban while the account was exempt.
    h.gateway.unban("c", "spambot1");
    h.edit_row("spambot1", |r| r.status = BanStatus::Active);
    let attempts = h.gateway.ban_attempts();
    let report = h.cycle().await;

    assert_eq!(report.relisted, 1);
    assert_eq!(report.bans_applied, 1);
    assert_eq!(report.already_satisfied, 1);
    assert_eq!(h.gateway.ban_attempts(), attempts + 1);
    assert!(h.gateway.is_banned_in("c", "spambot1"));
    assert!(!h.gateway.is_banned_in(MAIN, "spambot1"));

    // Relisting happens once per edit.
    assert_eq!(h.cycle().await.relisted, 0);
    assert_eq!(h.gateway.ban_attempts(), attempts + 1);
}

#[tokio::test]
async fn test_reactivation_lifts_permanent_block() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::PermanentAction("account suspended".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;
    assert_eq!(h.ledger.entries()[0].2.kind, FailureKind::Permanent);

    h.gateway.clear_ban_failure("c");
    h.edit_row("spambot1", |r| r.status = BanStatus::Ignored);
    h.cycle().await;
    assert_eq!(h.ledger.entries().len(), 1);

    h.edit_row("spambot1", |r| r.status = BanStatus::Active);
    let report = h.cycle().await;

    assert_eq!(report.relisted, 1);
    assert!(h.gateway.is_banned_in("c", "spambot1"));
    assert!(h.ledger.entries().is_empty());
}

#[tokio::test]
async fn test_cleared_reconcile_time_lifts_permanent_block() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::PermanentAction("account suspended".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;
    h.gateway.clear_ban_failure("c");

    h.edit_row("spambot1", |r| r.last_reconciled_at = None);
    let report = h.cycle().await;

    assert_eq!(report.relisted, 1);
    assert!(h.gateway.is_banned_in("c", "spambot1"));
    assert!(h.ledger.entries().is_empty());
    assert!(
        h.page()
            .get(&account("spambot1"))
            .unwrap()
            .last_reconciled_at
            .is_some()
    );
}

#[tokio::test]
async fn test_blocked_target_banned_by_hand_is_satisfied() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::PermanentAction("account suspended".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;
    assert_eq!(h.ledger.entries().len(), 1);

    // A moderator of c bans the account by hand, then b tags it again.
    h.gateway.clear_ban_failure("c");
    h.gateway.set_banned("c", "spambot1");
    h.gateway
        .push_log("b", "spambot1", "mod_b", Some("ADA"), later(2));
    let report = h.cycle().await;

    assert_eq!(report.already_satisfied, 2);
    assert_eq!(report.bans_applied, 0);
    assert!(h.ledger.entries().is_empty());
    let last = h.gateway.messages().pop().unwrap();
    assert!(last.body.contains("Already banned on: r/a, r/c"));
    assert!(!last.body.contains("earlier permanent failure"));
}

#[tokio::test]
async fn test_transient_failure_is_retried_next_cycle() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::TransientGateway("503 from platform".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let report = h.cycle().await;
    assert_eq!(report.bans_applied, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(h.ban_targets(), vec!["b"]);
    assert!(h.page().get(&account("spambot1")).is_some());

    let body = &h.gateway.messages()[0].body;
    assert!(body.contains("Banned on: r/b\n"));
    assert!(body.contains("r/c: "));

    let entries = h.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, "c");
    assert_eq!(entries[0].2.kind, FailureKind::Transient);

    h.gateway.clear_ban_failure("c");
    let attempts = h.gateway.ban_attempts();
    let report = h.cycle().await;

    assert_eq!(report.retried, 1);
    assert_eq!(h.gateway.ban_attempts(), attempts + 1);
    assert_eq!(h.ban_targets(), vec!["b", "c"]);
    assert!(h.ledger.entries().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::PermanentAction("account suspended".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;
    assert_eq!(h.ledger.entries()[0].2.kind, FailureKind::Permanent);

    h.gateway.clear_ban_failure("c");
    let attempts = h.gateway.ban_attempts();
    let report = h.cycle().await;
    assert_eq!(report.retried, 0);
    assert_eq!(h.gateway.ban_attempts(), attempts);

    // A new tag of the same account skips the blocked target.
    h.gateway.unban("b", "spambot1");
    h.gateway
        .push_log("b", "spambot1", "mod_b", Some("ADA"), later(2));
    h.cycle().await;
    assert!(!h.gateway.is_banned_in("c", "spambot1"));
    let last = h.gateway.messages().pop().unwrap();
    assert!(last.body.contains("earlier permanent failure: r/c"));
}

#[tokio::test]
async fn test_transient_failures_escalate() {
    let h = Harness::new().await;
    h.gateway
        .fail_bans("c", AppError::TransientGateway("timeout".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    // max_attempts is 3 in the harness.
    h.cycle().await;
    h.cycle().await;
    h.cycle().await;
    let entries = h.ledger.entries();
    assert_eq!(entries[0].2.attempts, 3);
    assert_eq!(entries[0].2.kind, FailureKind::Permanent);

    let attempts = h.gateway.ban_attempts();
    h.cycle().await;
    assert_eq!(h.gateway.ban_attempts(), attempts);
}

#[tokio::test]
async fn test_propagated_bans_never_loop() {
    for keyword in ["ADA", "Banned", "main list", SYSTEM_NOTE] {
        let h = Harness::with_config(gateway(), config(keyword, false));
        h.cycle().await;
        h.gateway.push_log(
            "a",
            "spambot1",
            "mod_a",
            Some(&format!("spam {keyword}")),
            later(1),
        );
        // A human copying the system note is not a trigger either.
        h.gateway
            .push_log("b", "spambot2", "mod_b", Some(SYSTEM_NOTE), later(1));

        let first = h.cycle().await;
        assert_eq!(first.events, 1, "keyword {keyword:?}");
        let second = h.cycle().await;
        assert_eq!(second.events, 0, "keyword {keyword:?}");
        assert_eq!(h.gateway.ban_attempts(), 2, "keyword {keyword:?}");
    }
}

#[tokio::test]
async fn test_checkpoints_are_monotonic() {
    let h = Harness::new().await;
    let onboarded = h.checkpoint("a").await.unwrap();

    let at = later(5);
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), at);
    h.cycle().await;
    let after_event = h.checkpoint("a").await.unwrap();
    assert!(after_event >= at);
    assert!(after_event > onboarded);

    // The platform replays old entries; none is processed again.
    h.gateway.ignore_since_filter(true);
    h.gateway
        .push_log("a", "spambot3", "mod_a", Some("ADA"), onboarded);
    let attempts = h.gateway.ban_attempts();
    let report = h.cycle().await;

    assert_eq!(report.events, 0);
    assert_eq!(h.gateway.ban_attempts(), attempts);
    assert_eq!(h.checkpoint("a").await.unwrap(), after_event);
}

#[tokio::test]
async fn test_ban_logged_around_onboarding_is_not_skipped() {
    let h = Harness::new().await;
    let onboarded = h.checkpoint("a").await.unwrap();
    assert!(onboarded < Utc::now());

    // Timestamped before the onboarding fetch by the platform's clock.
    h.gateway.push_log(
        "a",
        "spambot1",
        "mod_a",
        Some("Spam ADA"),
        onboarded + chrono::Duration::seconds(30),
    );
    let report = h.cycle().await;

    assert_eq!(report.events, 1);
    assert_eq!(h.ban_targets(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_moderators_are_never_propagated() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "mod_b", "mod_a", Some("ADA rogue mod"), later(1));
    h.gateway
        .push_log("a", "ada_bot", "mod_a", Some("ADA"), later(2));

    let report = h.cycle().await;

    assert_eq!(report.events, 2);
    assert_eq!(h.gateway.ban_attempts(), 0);
    assert!(h.page().is_empty());
}

#[tokio::test]
async fn test_corrupt_registry_aborts_cycle() {
    let h = Harness::new().await;
    let checkpoint = h.checkpoint("a").await;
    h.gateway.set_page(MAIN, PAGE_ID, "| who | what |\n|---|---|\n");
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let err = h.coordinator.run_cycle(&h.shutdown).await.unwrap_err();

    assert!(matches!(err, AppError::RegistryCorruption(_)));
    assert_eq!(h.gateway.ban_attempts(), 0);
    assert_eq!(h.checkpoint("a").await, checkpoint);
}

#[tokio::test]
async fn test_moderator_listing_failure_aborts_cycle() {
    let h = Harness::new().await;
    h.gateway
        .fail_moderators(Some(AppError::TransientGateway("503".into())));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let err = h.coordinator.run_cycle(&h.shutdown).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.gateway.ban_attempts(), 0);

    h.gateway.fail_moderators(None);
    assert_eq!(h.cycle().await.events, 1);
}

#[tokio::test]
async fn test_detection_failure_skips_only_that_community() {
    let h = Harness::new().await;
    let checkpoint = h.checkpoint("b").await;
    h.gateway
        .fail_logs("b", AppError::TransientGateway("503".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    let report = h.cycle().await;

    assert_eq!(report.detection_errors, 1);
    assert_eq!(report.events, 1);
    assert_eq!(h.checkpoint("b").await, checkpoint);
}

#[tokio::test]
async fn test_new_community_is_swept() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;

    h.gateway.add_community("d", &["mod_d"]);
    let report = h.cycle().await;

    assert_eq!(report.swept, 1);
    assert!(h.gateway.is_banned_in("d", "spambot1"));
    assert!(h.checkpoint("d").await.is_some());

    // Onboarding happens once.
    let attempts = h.gateway.ban_attempts();
    h.gateway.unban("d", "spambot1");
    h.cycle().await;
    assert_eq!(h.gateway.ban_attempts(), attempts);
}

#[tokio::test]
async fn test_full_sweep_restores_lifted_bans() {
    let h = Harness::with_config(gateway(), config("ADA", true));
    h.cycle().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;

    h.gateway.unban("c", "spambot1");
    let report = h.cycle().await;

    assert_eq!(report.bans_applied, 1);
    assert!(h.gateway.is_banned_in("c", "spambot1"));
}

#[tokio::test]
async fn test_manual_rows_are_trusted_and_kept() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    h.cycle().await;

    // A moderator adds a row and a comment by hand.
    let text = h.gateway.page(MAIN, PAGE_ID).unwrap();
    let edited = text.replace(
        "| spambot1 |",
        "| handadded | ignored | b | 2023-05-01T00:00:00Z |  |  |\n| spambot1 |",
    ) + "\nPlease keep this list tidy.\n";
    h.gateway.set_page(MAIN, PAGE_ID, &edited);

    h.gateway
        .push_log("b", "spambot2", "mod_b", Some("ADA"), later(2));
    h.cycle().await;

    let text = h.gateway.page(MAIN, PAGE_ID).unwrap();
    assert!(text.contains("| handadded | ignored | b | 2023-05-01T00:00:00Z |  |  |"));
    assert!(text.contains("Please keep this list tidy."));
    assert_eq!(h.page().len(), 3);
}

#[tokio::test]
async fn test_full_page_alerts_operators() {
    let h = Harness::new().await;
    h.gateway
        .fail_page_writes(AppError::PageTooLarge("page exceeds 512 KiB".into()));
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));

    h.cycle().await;

    let alert = h
        .gateway
        .messages()
        .into_iter()
        .find(|m| m.recipient == format!("r/{MAIN}"))
        .unwrap();
    assert!(alert.subject.contains("full"));
    assert!(h.page().is_empty());

    // The event is read again once the page is writable.
    h.gateway.clear_page_failure();
    let report = h.cycle().await;
    assert_eq!(report.events, 1);
    assert!(h.page().get(&account("spambot1")).is_some());
}

#[tokio::test]
async fn test_shutdown_stops_between_communities() {
    let h = Harness::new().await;
    h.gateway
        .push_log("a", "spambot1", "mod_a", Some("Spam ADA"), later(1));
    let checkpoint = h.checkpoint("a").await;

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let report = h.coordinator.run_cycle(&rx).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.events, 0);
    assert_eq!(h.gateway.ban_attempts(), 0);
    assert_eq!(h.checkpoint("a").await, checkpoint);
}
