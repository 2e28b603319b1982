//! Reconciler property tests.
//!
//! These run the pure decision procedure over a grid of accounts, origins,
//! live states and registry rows.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};

use ada_core::{
    Account, ActionKind, BanEvent, BanRecord, BanStatus, CommunityName, LiveState,
    ModeratedCommunity, ReconcileContext, Reconciler,
};
use chrono::{TimeZone, Utc};

const COMMUNITIES: [&str; 5] = ["a", "b", "c", "d", "adalist"];

fn c(name: &str) -> CommunityName {
    CommunityName::parse(name).unwrap()
}

fn communities() -> Vec<ModeratedCommunity> {
    COMMUNITIES
        .iter()
        .map(|n| ModeratedCommunity {
            name: c(n),
            checkpoint: None,
            is_main_list: *n == "adalist",
        })
        .collect()
}

fn event(account: &str, origin: &str, note: &str) -> BanEvent {
    BanEvent {
        account: Account::parse(account).unwrap(),
        community: c(origin),
        moderator: Account::parse("mod1").unwrap(),
        note_text: note.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        keyword_matched: true,
    }
}

/// Every combination of banned/unknown/not-banned over the targets.
fn live_states() -> Vec<HashMap<CommunityName, LiveState>> {
    let states = [LiveState::Banned, LiveState::NotBanned, LiveState::Unknown];
    let mut out = vec![HashMap::new()];
    for name in COMMUNITIES {
        out = out
            .into_iter()
            .flat_map(|m| {
                states.iter().map(move |s| {
                    let mut m = m.clone();
                    m.insert(c(name), *s);
                    m
                })
            })
            .collect();
    }
    out
}

#[test]
fn test_ignored_accounts_never_get_bans() {
    let communities = communities();
    let protected = HashSet::new();
    let blocked = HashSet::new();
    let record = BanRecord {
        account: Account::parse("trollacct").unwrap(),
        status: BanStatus::Ignored,
        source_community: c("a"),
        first_seen_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        last_reconciled_at: None,
        evidence_ref: None,
    };

    for live in live_states() {
        let ctx = ReconcileContext {
            communities: &communities,
            protected: &protected,
            live: &live,
            blocked: &blocked,
            now: Utc::now(),
        };
        for main_list_only in [false, true] {
            let reconciler = Reconciler::new(main_list_only);
            for origin in COMMUNITIES {
                for note in ["ADA", "Spam ADA", "ADA ADA"] {
                    let r = reconciler.reconcile(&event("TrollAcct", origin, note), Some(&record), &ctx);
                    assert_eq!(r.bans().count(), 0);
                }
            }
            let targets: Vec<CommunityName> = COMMUNITIES.iter().map(|n| c(n)).collect();
            let r = reconciler.reconcile_targets(&record, &targets, &ctx);
            assert_eq!(r.bans().count(), 0);
        }
    }
}

#[test]
fn test_second_run_after_commit_is_a_no_op() {
    let communities = communities();
    let protected = HashSet::new();
    let blocked = HashSet::new();
    let reconciler = Reconciler::new(false);

    for live in live_states() {
        for origin in COMMUNITIES {
            let event = event("spambot1", origin, "Spam ADA");
            let ctx = ReconcileContext {
                communities: &communities,
                protected: &protected,
                live: &live,
                blocked: &blocked,
                now: Utc::now(),
            };
            let first = reconciler.reconcile(&event, None, &ctx);
            let mut delta = first.delta.clone().unwrap();

            // Every ban succeeds and the live state reflects it.
            let mut after = live.clone();
            for action in first.bans() {
                delta.record_result(action.target_community.clone(), &Ok(()));
                after.insert(action.target_community.clone(), LiveState::Banned);
            }
            let record = delta.merge_into(None).unwrap();

            let ctx = ReconcileContext {
                live: &after,
                ..ctx
            };
            let second = reconciler.reconcile(&event, Some(&record), &ctx);
            assert_eq!(second.bans().count(), 0);
            assert!(second
                .actions
                .iter()
                .all(|a| a.kind == ActionKind::AlreadySatisfied));

            let merged = second.delta.unwrap().merge_into(Some(&record)).unwrap();
            assert_eq!(merged.status, BanStatus::Active);
            assert_eq!(merged.first_seen_at, record.first_seen_at);
        }
    }
}

#[test]
fn test_origin_is_never_a_target() {
    let communities = communities();
    let reconciler = Reconciler::new(true);
    for origin in COMMUNITIES {
        let targets = reconciler.targets_for(Some(&c(origin)), &communities);
        assert!(!targets.contains(&c(origin)));
        assert!(!targets.contains(&c("adalist")));
    }
}
