//! Ban registry store.
//!
//! The registry is the single source of truth for which accounts are banned
//! everywhere and which are exempt. It is persisted as a page on the
//! main-list community so moderators can read and edit it by hand.

use std::sync::{Arc, PoisonError, RwLock};

use ada_common::{AppError, AppResult};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::gateway::CommunityGateway;
use super::model::{Account, BanRecord, BanStatus, CommunityName, RegistryDelta};
use super::registry_page::RegistryPage;

/// Preamble written when the registry page does not exist yet.
pub const PAGE_PREAMBLE: &str = "# ADA main list\n\
\n\
Accounts in this table are banned from every community the bot moderates.\n\
Set the status of a row to `ignored` to exempt an account.\n";

/// An immutable view of the registry as of the last refresh or write.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    page: Arc<RegistryPage>,
}

impl RegistrySnapshot {
    /// Wrap a parsed page.
    #[must_use]
    pub fn new(page: RegistryPage) -> Self {
        Self {
            page: Arc::new(page),
        }
    }

    /// Look up an account.
    #[must_use]
    pub fn get(&self, account: &Account) -> Option<&BanRecord> {
        self.page.get(account)
    }

    /// Records with the given status, in page order.
    pub fn records(&self, status: BanStatus) -> impl Iterator<Item = &BanRecord> + '_ {
        self.page.records().filter(move |r| r.status == status)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.page.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.page.is_empty()
    }
}

/// Trait for registry persistence.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Re-read the persisted registry.
    async fn refresh(&self) -> AppResult<RegistrySnapshot>;

    /// The registry as of the last refresh or write.
    fn snapshot(&self) -> RegistrySnapshot;

    /// Look up an account in the current snapshot.
    async fn get(&self, account: &Account) -> AppResult<Option<BanRecord>> {
        Ok(self.snapshot().get(account).cloned())
    }

    /// Commit a delta. Returns the stored row, or `None` when the delta
    /// neither matched a row nor asked for one to be created.
    async fn upsert(&self, delta: &RegistryDelta) -> AppResult<Option<BanRecord>>;

    /// Change the status of an existing row.
    async fn set_status(&self, account: &Account, status: BanStatus) -> AppResult<BanRecord>;

    /// Records with the given status.
    async fn list(&self, status: BanStatus) -> AppResult<Vec<BanRecord>> {
        Ok(self.snapshot().records(status).cloned().collect())
    }
}

/// Registry persisted on a community page.
pub struct PageRegistryStore {
    gateway: Arc<dyn CommunityGateway>,
    community: CommunityName,
    page_id: String,
    cached: RwLock<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

impl PageRegistryStore {
    /// Create a store for the page `page_id` on `community`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommunityGateway>,
        community: CommunityName,
        page_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            community,
            page_id: page_id.into(),
            cached: RwLock::new(RegistrySnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Community hosting the page.
    #[must_use]
    pub const fn community(&self) -> &CommunityName {
        &self.community
    }

    fn template() -> String {
        format!("{PAGE_PREAMBLE}\n{}", RegistryPage::empty().render())
    }

    /// Read and parse the page, creating it when missing.
    async fn load(&self) -> AppResult<RegistryPage> {
        let text = match self.gateway.read_page(&self.community, &self.page_id).await? {
            Some(text) => text,
            None => {
                let text = Self::template();
                tracing::info!(
                    community = %self.community,
                    page = %self.page_id,
                    "Registry page missing, creating it"
                );
                self.gateway
                    .write_page(&self.community, &self.page_id, &text, "Create ADA main list")
                    .await?;
                text
            }
        };

        RegistryPage::parse(&text).map_err(|e| {
            let err = AppError::from(e);
            err.log("registry page parse");
            err
        })
    }

    fn store_snapshot(&self, page: RegistryPage) -> RegistrySnapshot {
        let snapshot = RegistrySnapshot::new(page);
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        snapshot
    }

    /// Read-modify-write of a single row.
    async fn write_row<F>(&self, reason: &str, edit: F) -> AppResult<Option<BanRecord>>
    where
        F: FnOnce(&RegistryPage) -> AppResult<Option<BanRecord>> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut page = self.load().await?;

        let Some(record) = edit(&page)? else {
            self.store_snapshot(page);
            return Ok(None);
        };

        if page.upsert(record.clone()) {
            self.gateway
                .write_page(&self.community, &self.page_id, &page.render(), reason)
                .await?;
            tracing::debug!(account = %record.account, status = %record.status, "Registry row written");
        }
        self.store_snapshot(page);
        Ok(Some(record))
    }
}

#[async_trait]
impl RegistryStore for PageRegistryStore {
    async fn refresh(&self) -> AppResult<RegistrySnapshot> {
        let page = self.load().await?;
        let snapshot = self.store_snapshot(page);
        tracing::debug!(records = snapshot.len(), "Registry refreshed");
        Ok(snapshot)
    }

    fn snapshot(&self) -> RegistrySnapshot {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn upsert(&self, delta: &RegistryDelta) -> AppResult<Option<BanRecord>> {
        let reason = format!("ADA: {}", delta.account);
        self.write_row(&reason, |page| Ok(delta.merge_into(page.get(&delta.account))))
            .await
    }

    async fn set_status(&self, account: &Account, status: BanStatus) -> AppResult<BanRecord> {
        let reason = format!("ADA: mark {account} {status}");
        let record = self
            .write_row(&reason, |page| {
                let current = page
                    .get(account)
                    .ok_or_else(|| AppError::NotFound(format!("registry row {account}")))?;
                Ok(Some(BanRecord {
                    status,
                    ..current.clone()
                }))
            })
            .await?;
        record.ok_or_else(|| AppError::NotFound(format!("registry row {account}")))
    }
}
