//! Evidence reports about banned accounts.
//!
//! When an account enters the registry the bot summarizes its public
//! activity so the moderator who banned it can double-check the decision.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use ada_common::{AppResult, IdGenerator};
use ada_db::{entities::evidence_report, repositories::EvidenceReportRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sea_orm::Set;

use super::executor::GatewayExecutor;
use super::gateway::{AccountActivity, AccountStanding, ActivityItem, CommunityGateway};
use super::model::{Account, BanEvent, CommunityName};

#[allow(clippy::expect_used)]
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?([^\]/)\s]+)").expect("domain pattern is valid")
});

/// Domains of the platform itself, never listed as external.
const PLATFORM_DOMAINS: [&str; 2] = ["reddit.com", "redd.it"];

/// Site-wide report links closing every activity report.
const REPORT_FOOTER: &str = "\n---\n\n\
[Report for Spam](https://www.reddit.com/report?reason=this-is-spam) • \
[Ban Evasion](https://www.reddit.com/report?reason=its-ban-evasion) • \
[Abuse](https://www.reddit.com/report?reason=its-promoting-hate-based-on-identity-or-vulnerability) • \
[Violence](https://www.reddit.com/report?reason=it-threatens-violence-or-physical-harm)\n";

/// Entries per ranking table.
const TOP_N: usize = 10;

/// Extract link domains from free text.
#[must_use]
pub fn extract_domains(text: &str) -> Vec<String> {
    DOMAIN_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

fn is_external(domain: &str) -> bool {
    !PLATFORM_DOMAINS.iter().any(|p| domain.contains(p))
}

/// Count occurrences and keep the most frequent, ties by name.
fn top_counts<I: IntoIterator<Item = String>>(items: I) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_N);
    ranked
}

fn ranking_table(title: &str, column: &str, rows: &[(String, usize)]) -> String {
    let mut out = format!("\n#### {title}\n\n| {column} | Count |\n|---|---|\n");
    for (name, count) in rows {
        out.push_str(&format!("| {name} | {count} |\n"));
    }
    out
}

fn removal_line(kind: &str, items: &[ActivityItem]) -> String {
    let removed = items.iter().filter(|i| i.removed).count();
    let percentage = removed as f64 / items.len() as f64 * 100.0;
    format!(
        "\n*{removed}/{} {kind} removed site-wide ({percentage:.2}%)*\n",
        items.len()
    )
}

fn activity_section(kind: &str, title: &str, items: &[ActivityItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let top = top_counts(items.iter().map(|i| format!("r/{}", i.community)));
    let mut out = ranking_table(title, "Community", &top);
    out.push_str(&removal_line(kind, items));
    out
}

fn linked_domains(activity: &AccountActivity) -> Vec<(String, usize)> {
    let from_links = activity
        .submissions
        .iter()
        .filter_map(|s| s.url.as_deref())
        .flat_map(extract_domains);
    let from_comments = activity.comments.iter().flat_map(|c| extract_domains(&c.body));
    top_counts(from_links.chain(from_comments).filter(|d| is_external(d)))
}

/// Render a Markdown report about an account.
#[must_use]
pub fn build_report(account: &Account, standing: &AccountStanding, now: DateTime<Utc>) -> String {
    let activity = match standing {
        AccountStanding::Suspended => {
            return format!("User u/{account} is likely already suspended.");
        }
        AccountStanding::ShadowBanned => {
            return format!("User u/{account} is likely already shadow-banned.");
        }
        AccountStanding::Visible(activity) => activity,
    };

    let age_days = (now - activity.created_at).num_days().max(0);
    let mut out = format!(
        "#### u/{account}\n\n\
         * Submission karma: {}\n\
         * Examined submissions: {}\n\
         * Comment karma: {}\n\
         * Examined comments: {}\n\
         * Account age: {age_days} days (created {})\n\
         * Verified email: {}\n",
        activity.link_karma,
        activity.submissions.len(),
        activity.comment_karma,
        activity.comments.len(),
        activity.created_at.format("%Y-%m-%d"),
        if activity.verified_email { "yes" } else { "no" },
    );

    out.push_str(&activity_section("submissions", "Submissions", &activity.submissions));
    out.push_str(&activity_section("comments", "Comments", &activity.comments));

    let domains = linked_domains(activity);
    if !domains.is_empty() {
        let rows: Vec<(String, usize)> = domains
            .into_iter()
            .map(|(d, n)| (format!("`{d}`"), n))
            .collect();
        out.push_str(&ranking_table("Linked external domains", "Domain", &rows));
    }
    out.push_str(REPORT_FOOTER);
    out
}

/// A report to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceReport {
    pub id: String,
    pub account: Account,
    pub source_community: CommunityName,
    pub moderator: Option<Account>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for report persistence.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persist a report.
    async fn save(&self, report: &EvidenceReport) -> AppResult<()>;
}

#[async_trait]
impl EvidenceStore for EvidenceReportRepository {
    async fn save(&self, report: &EvidenceReport) -> AppResult<()> {
        self.create(evidence_report::ActiveModel {
            id: Set(report.id.clone()),
            account: Set(report.account.as_str().to_string()),
            source_community: Set(report.source_community.as_str().to_string()),
            moderator: Set(report.moderator.as_ref().map(|m| m.as_str().to_string())),
            body: Set(report.body.clone()),
            created_at: Set(report.created_at.into()),
        })
        .await?;
        Ok(())
    }
}

/// Gathers, renders and stores evidence reports.
#[derive(Clone)]
pub struct EvidenceCollector {
    gateway: Arc<dyn CommunityGateway>,
    executor: GatewayExecutor,
    store: Arc<dyn EvidenceStore>,
    id_gen: IdGenerator,
}

impl EvidenceCollector {
    /// Create a new collector.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommunityGateway>,
        executor: GatewayExecutor,
        store: Arc<dyn EvidenceStore>,
    ) -> Self {
        Self {
            gateway,
            executor,
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Build and store a report for the account of `event`.
    pub async fn collect(&self, event: &BanEvent) -> AppResult<EvidenceReport> {
        let standing = self
            .executor
            .timed("account activity", self.gateway.account_activity(&event.account))
            .await?;

        let now = Utc::now();
        let report = EvidenceReport {
            id: self.id_gen.generate(),
            account: event.account.clone(),
            source_community: event.community.clone(),
            moderator: Some(event.moderator.clone()),
            body: build_report(&event.account, &standing, now),
            created_at: now,
        };
        self.store.save(&report).await?;

        tracing::debug!(account = %event.account, evidence = %report.id, "Evidence stored");
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn item(community: &str, removed: bool, body: &str, url: Option<&str>) -> ActivityItem {
        ActivityItem {
            community: community.to_string(),
            removed,
            body: body.to_string(),
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_extract_domains() {
        let text = "see https://www.Example.com/a and http://spam.io) or [x](https://reddit.com/r/a)";
        assert_eq!(
            extract_domains(text),
            vec!["example.com", "spam.io", "reddit.com"]
        );
        assert!(extract_domains("no links here").is_empty());
    }

    #[test]
    fn test_report_for_suspended_account() {
        let account = Account::parse("spambot1").unwrap();
        let body = build_report(&account, &AccountStanding::Suspended, Utc::now());
        assert!(body.contains("suspended"));
        let body = build_report(&account, &AccountStanding::ShadowBanned, Utc::now());
        assert!(body.contains("shadow-banned"));
    }

    #[test]
    fn test_report_sections() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let activity = AccountActivity {
            created_at: now - Duration::days(12),
            link_karma: 3,
            comment_karma: -40,
            verified_email: false,
            submissions: vec![
                item("deals", true, "", Some("https://cheap-pills.example/buy")),
                item("deals", false, "", Some("https://www.reddit.com/r/deals")),
                item("pics", false, "", None),
            ],
            comments: vec![item("pics", true, "buy at http://cheap-pills.example", None)],
        };

        let account = Account::parse("SpamBot1").unwrap();
        let body = build_report(&account, &AccountStanding::Visible(activity), now);

        assert!(body.starts_with("#### u/SpamBot1"));
        assert!(body.contains("Account age: 12 days"));
        assert!(body.contains("Verified email: no"));
        assert!(body.contains("| r/deals | 2 |"));
        assert!(body.contains("1/3 submissions removed site-wide (33.33%)"));
        assert!(body.contains("1/1 comments removed site-wide (100.00%)"));
        assert!(body.contains("| `cheap-pills.example` | 2 |"));
        assert!(!body.contains("`reddit.com`"));
        assert!(body.ends_with(REPORT_FOOTER));
    }

    #[test]
    fn test_report_footer_links() {
        let activity = AccountActivity {
            created_at: Utc::now(),
            link_karma: 1,
            comment_karma: 1,
            verified_email: true,
            submissions: Vec::new(),
            comments: Vec::new(),
        };
        let account = Account::parse("quietbot").unwrap();
        let body = build_report(&account, &AccountStanding::Visible(activity), Utc::now());

        let footer = body.split("\n---\n").nth(1).unwrap();
        for reason in [
            "this-is-spam",
            "its-ban-evasion",
            "its-promoting-hate-based-on-identity-or-vulnerability",
            "it-threatens-violence-or-physical-harm",
        ] {
            assert!(
                footer.contains(&format!("https://www.reddit.com/report?reason={reason})")),
                "missing {reason}"
            );
        }

        let suspended = build_report(&account, &AccountStanding::Suspended, Utc::now());
        assert!(!suspended.contains("report?reason"));
    }

    #[test]
    fn test_top_counts_truncates() {
        let items = (0..15).map(|i| format!("c{i:02}"));
        let top = top_counts(items);
        assert_eq!(top.len(), TOP_N);
        assert_eq!(top[0].0, "c00");
    }

    #[tokio::test]
    async fn test_repository_store() {
        let now = Utc::now();
        let row = evidence_report::Model {
            id: "01hq".to_string(),
            account: "spambot1".to_string(),
            source_community: "a".to_string(),
            moderator: Some("mod1".to_string()),
            body: "report".to_string(),
            created_at: now.into(),
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[row]])
                .into_connection(),
        );

        let report = EvidenceReport {
            id: "01hq".to_string(),
            account: Account::parse("spambot1").unwrap(),
            source_community: CommunityName::parse("a").unwrap(),
            moderator: Account::parse("mod1").ok(),
            body: "report".to_string(),
            created_at: now,
        };
        EvidenceReportRepository::new(db).save(&report).await.unwrap();
    }
}
