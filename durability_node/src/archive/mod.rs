// Archival deals for the durability node
//
// Content explicitly promoted to cold storage gets a long-lived deal with a
// storage provider. Deals move scheduled -> pending -> active (or failed), are
// persisted in the ledger on every transition, and expire after their term.
// Two workers drive the lifecycle; they and the manual triggers share one
// try-lock so at most one deal pass runs at a time.

pub mod client;
pub mod store;

pub use client::{
    ArchivalClient, DealProposal, DealState, LotusArchivalClient, SimulatedArchivalClient,
};
pub use store::DealStore;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ArchivalConfig;
use crate::error::{DurabilityError, Result};
use crate::events::{DurabilityEvent, EventBus};
use crate::types::now_millis;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Hot storage seen from the archival side
#[async_trait]
pub trait HotStorage: Send + Sync {
    /// Whether any node currently holds the CID
    async fn is_present(&self, cid: &str) -> Result<bool>;

    /// Object bytes from hot storage
    async fn read(&self, cid: &str) -> Result<Bytes>;

    /// Put retrieved content back into hot storage; returns replicas placed.
    /// `None` means re-pin by CID.
    async fn restore(&self, cid: &str, data: Option<Bytes>) -> Result<usize>;
}

/// Deal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Scheduled,
    Pending,
    Active,
    Failed,
    Expired,
}

impl DealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DealStatus::Scheduled => "scheduled",
            DealStatus::Pending => "pending",
            DealStatus::Active => "active",
            DealStatus::Failed => "failed",
            DealStatus::Expired => "expired",
        }
    }

    /// Scheduled, pending or active deals block a new deal for the same CID
    pub fn is_live(self) -> bool {
        matches!(self, DealStatus::Scheduled | DealStatus::Pending | DealStatus::Active)
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = DurabilityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(DealStatus::Scheduled),
            "pending" => Ok(DealStatus::Pending),
            "active" => Ok(DealStatus::Active),
            "failed" => Ok(DealStatus::Failed),
            "expired" => Ok(DealStatus::Expired),
            other => Err(DurabilityError::InvalidRequest(format!(
                "Unknown deal status: {}",
                other
            ))),
        }
    }
}

/// One archival deal, keyed by CID
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilecoinDeal {
    /// Caller's content identifier
    pub content_id: String,
    pub cid: String,
    /// Reference returned by the archival network on submission
    pub deal_ref: Option<String>,
    /// On-chain deal id, set on activation
    pub deal_id: Option<String>,
    pub status: DealStatus,
    pub miner_address: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub data_size_bytes: u64,
    /// attoFIL
    pub price: String,
    pub last_checked_at: Option<u64>,
    pub error_message: Option<String>,
}

/// Deal counts by status
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealSummary {
    pub total: usize,
    pub scheduled: usize,
    pub pending: usize,
    pub active: usize,
    pub failed: usize,
    pub expired: usize,
}

/// Outcome of one worker pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRun {
    /// Another pass was already running
    pub skipped: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Left scheduled because hot storage could not be checked
    pub deferred: usize,
    /// Transitions the ledger failed to record
    pub unsaved: usize,
}

impl DealRun {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

enum Submission {
    Submitted(String),
    Deferred(DurabilityError),
}

/// Archival manager
pub struct ArchivalManager {
    /// Deals by CID
    deals: RwLock<HashMap<String, FilecoinDeal>>,

    /// Persistent ledger
    store: DealStore,

    /// Archival network
    client: Arc<dyn ArchivalClient>,

    /// Hot storage used to verify, read and restore content
    hot: Arc<dyn HotStorage>,

    /// Serializes worker passes and manual triggers
    worker_lock: Mutex<()>,

    config: ArchivalConfig,
    events: EventBus,
}

impl ArchivalManager {
    /// Create a manager and open its ledger. Call `load` to recover deals.
    pub async fn new(
        config: ArchivalConfig,
        client: Arc<dyn ArchivalClient>,
        hot: Arc<dyn HotStorage>,
        events: EventBus,
    ) -> Result<Self> {
        let store = DealStore::open(config.ledger_path()).await?;
        info!(
            "Archival manager using {} backend, ledger {}",
            client.name(),
            store.path().display()
        );

        Ok(Self {
            deals: RwLock::new(HashMap::new()),
            store,
            client,
            hot,
            worker_lock: Mutex::new(()),
            config,
            events,
        })
    }

    /// Recover deals from the ledger; returns the number loaded
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.store.load_all().await?;
        let count = loaded.len();
        let mut deals = self.deals.write();
        for deal in loaded {
            deals.insert(deal.cid.clone(), deal);
        }
        info!("Loaded {} deals from the ledger", count);
        Ok(count)
    }

    /// Schedule an archival deal. Returns true if a live deal exists or was created.
    pub async fn archive(&self, content_id: &str, cid: &str, size_bytes: u64) -> Result<bool> {
        if content_id.is_empty() || cid.is_empty() {
            return Err(DurabilityError::InvalidRequest(
                "contentId and cid are required".to_string(),
            ));
        }

        if let Some(existing) = self.deal(cid) {
            if existing.status.is_live() {
                debug!("{} already has a {} deal", cid, existing.status);
                return Ok(true);
            }
        }

        let miner = self
            .config
            .miners
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| DurabilityError::DealFailed("No miners available".to_string()))?;

        let created_at = now_millis();
        let deal = FilecoinDeal {
            content_id: content_id.to_string(),
            cid: cid.to_string(),
            deal_ref: None,
            deal_id: None,
            status: DealStatus::Scheduled,
            miner_address: miner,
            created_at,
            expires_at: created_at.saturating_add(self.config.storage_days.saturating_mul(DAY_MILLIS)),
            data_size_bytes: size_bytes,
            price: "0".to_string(),
            last_checked_at: None,
            error_message: None,
        };

        info!("Scheduled archival of {} with miner {}", cid, deal.miner_address);
        self.save(deal, None).await?;
        Ok(true)
    }

    /// Persist a deal and publish its status change
    async fn save(&self, deal: FilecoinDeal, previous: Option<DealStatus>) -> Result<()> {
        self.store.upsert(&deal).await?;
        self.record(deal, previous);
        Ok(())
    }

    fn record(&self, deal: FilecoinDeal, previous: Option<DealStatus>) {
        let (cid, status) = (deal.cid.clone(), deal.status);
        self.deals.write().insert(cid.clone(), deal);

        if previous != Some(status) {
            self.events
                .emit(DurabilityEvent::DealStatusChanged { cid, status });
        }
    }

    /// Record a transition made during a worker pass. The in-memory state is
    /// updated even when the ledger write fails so the pass never repeats a
    /// submission; the next successful write of the deal catches the ledger up.
    async fn save_in_pass(&self, deal: FilecoinDeal, previous: DealStatus, run: &mut DealRun) {
        let persisted = self.store.upsert(&deal).await;
        let cid = deal.cid.clone();
        self.record(deal, Some(previous));
        if let Err(e) = persisted {
            error!("Failed to record deal for {} in the ledger: {}", cid, e);
            run.unsaved += 1;
        }
    }

    fn with_status(&self, status: DealStatus) -> Vec<FilecoinDeal> {
        self.deals
            .read()
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect()
    }

    /// Submit every scheduled deal whose content is in hot storage
    pub async fn process_scheduled_deals(&self) -> Result<DealRun> {
        let Ok(_guard) = self.worker_lock.try_lock() else {
            debug!("Deal pass already running, skipping scheduler");
            return Ok(DealRun::skipped());
        };

        let mut run = DealRun::default();
        for mut deal in self.with_status(DealStatus::Scheduled) {
            run.processed += 1;
            let previous = deal.status;

            match self.submit(&deal).await {
                Ok(Submission::Deferred(reason)) => {
                    warn!("Hot storage unavailable for {}, deal stays scheduled: {}", deal.cid, reason);
                    run.deferred += 1;
                    continue;
                }
                Ok(Submission::Submitted(deal_ref)) => {
                    info!("Submitted deal for {} to {}: {}", deal.cid, deal.miner_address, deal_ref);
                    deal.status = DealStatus::Pending;
                    deal.deal_ref = Some(deal_ref);
                    deal.price = self.config.price_atto_fil.clone();
                    run.succeeded += 1;
                }
                Err(e) => {
                    warn!("Deal for {} failed: {}", deal.cid, e);
                    deal.status = DealStatus::Failed;
                    deal.error_message = Some(e.to_string());
                    run.failed += 1;
                }
            }
            self.save_in_pass(deal, previous, &mut run).await;
        }

        Ok(run)
    }

    /// Submit one deal. Content that is gone fails the deal; a hot storage
    /// outage defers it to the next pass.
    async fn submit(&self, deal: &FilecoinDeal) -> Result<Submission> {
        let hot_missing = || DurabilityError::NotFound("Content not found in hot storage".to_string());
        match self.hot.is_present(&deal.cid).await {
            Ok(true) => {}
            Ok(false) | Err(DurabilityError::NotFound(_)) => return Err(hot_missing()),
            Err(e) => return Ok(Submission::Deferred(e)),
        }
        let payload = match self.hot.read(&deal.cid).await {
            Ok(payload) => payload,
            Err(DurabilityError::NotFound(_)) => return Err(hot_missing()),
            Err(e) => return Ok(Submission::Deferred(e)),
        };

        let proposal = DealProposal {
            cid: deal.cid.clone(),
            miner: deal.miner_address.clone(),
            size_bytes: deal.data_size_bytes.max(payload.len() as u64),
            price: self.config.price_atto_fil.clone(),
            duration_days: self.config.storage_days,
            wallet: self.config.wallet_address.clone(),
            payload,
        };
        self.client.submit_deal(&proposal).await.map(Submission::Submitted)
    }

    /// Poll pending deals and expire active deals past their term
    pub async fn check_pending_deals(&self) -> Result<DealRun> {
        let Ok(_guard) = self.worker_lock.try_lock() else {
            debug!("Deal pass already running, skipping poller");
            return Ok(DealRun::skipped());
        };

        let mut run = DealRun::default();
        for deal in self.with_status(DealStatus::Pending) {
            if deal.deal_ref.is_none() {
                continue;
            }
            run.processed += 1;
            let polled = self.poll(deal, &mut run).await;
            match polled.status {
                DealStatus::Active => run.succeeded += 1,
                DealStatus::Failed => run.failed += 1,
                _ => {}
            }
        }

        let now = now_millis();
        for mut deal in self.with_status(DealStatus::Active) {
            if deal.expires_at <= now {
                info!("Deal for {} expired", deal.cid);
                deal.status = DealStatus::Expired;
                self.save_in_pass(deal, DealStatus::Active, &mut run).await;
            }
        }

        Ok(run)
    }

    /// Query one pending deal and record the answer
    async fn poll(&self, mut deal: FilecoinDeal, run: &mut DealRun) -> FilecoinDeal {
        let Some(deal_ref) = deal.deal_ref.clone() else {
            return deal;
        };
        let previous = deal.status;
        deal.last_checked_at = Some(now_millis());

        match self.client.deal_status(&deal_ref).await {
            Ok(DealState::Active { deal_id }) => {
                info!("Deal for {} is active", deal.cid);
                deal.status = DealStatus::Active;
                deal.deal_id = deal_id;
            }
            Ok(DealState::Failed(message)) => {
                warn!("Deal for {} failed: {}", deal.cid, message);
                deal.status = DealStatus::Failed;
                deal.error_message = Some(message);
            }
            Ok(DealState::Pending) => debug!("Deal for {} still pending", deal.cid),
            Err(e) => {
                error!("Checking deal for {} failed: {}", deal.cid, e);
                deal.status = DealStatus::Failed;
                deal.error_message = Some(e.to_string());
            }
        }

        self.save_in_pass(deal.clone(), previous, run).await;
        deal
    }

    /// Poll one deal now if it is pending; otherwise return it as recorded
    pub async fn check_deal(&self, cid: &str) -> Result<FilecoinDeal> {
        let deal = self
            .deal(cid)
            .ok_or_else(|| DurabilityError::NotFound(format!("No deal for {}", cid)))?;
        if deal.status != DealStatus::Pending {
            return Ok(deal);
        }

        let Ok(_guard) = self.worker_lock.try_lock() else {
            return Ok(deal);
        };
        let mut run = DealRun::default();
        let deal = self.poll(deal, &mut run).await;
        if run.unsaved > 0 {
            return Err(DurabilityError::Storage(format!(
                "Deal for {} was checked but not recorded in the ledger",
                cid
            )));
        }
        Ok(deal)
    }

    /// Whether the CID has an active deal
    pub fn is_archived(&self, cid: &str) -> bool {
        self.deal(cid)
            .map(|d| d.status == DealStatus::Active)
            .unwrap_or(false)
    }

    /// Make archived content hot again. False when there is no active deal.
    pub async fn retrieve(&self, cid: &str) -> Result<bool> {
        let deal = match self.deal(cid) {
            Some(deal) if deal.status == DealStatus::Active => deal,
            _ => return Ok(false),
        };

        if self.hot.is_present(cid).await? {
            debug!("{} is already in hot storage", cid);
            return Ok(true);
        }

        let deal_ref = deal
            .deal_ref
            .as_deref()
            .ok_or_else(|| DurabilityError::DealFailed(format!("Active deal for {} has no reference", cid)))?;
        info!("Retrieving {} from miner {}", cid, deal.miner_address);
        let data = self
            .client
            .retrieve(deal_ref, &deal.miner_address, cid)
            .await?;
        let replicas = self.hot.restore(cid, data).await?;
        info!("Restored {} to hot storage on {} nodes", cid, replicas);
        Ok(true)
    }

    pub fn deal(&self, cid: &str) -> Option<FilecoinDeal> {
        self.deals.read().get(cid).cloned()
    }

    /// Every deal, oldest first
    pub fn deals(&self) -> Vec<FilecoinDeal> {
        let mut deals: Vec<FilecoinDeal> = self.deals.read().values().cloned().collect();
        deals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.cid.cmp(&b.cid)));
        deals
    }

    pub fn summary(&self) -> DealSummary {
        let deals = self.deals.read();
        let mut summary = DealSummary {
            total: deals.len(),
            ..DealSummary::default()
        };
        for deal in deals.values() {
            match deal.status {
                DealStatus::Scheduled => summary.scheduled += 1,
                DealStatus::Pending => summary.pending += 1,
                DealStatus::Active => summary.active += 1,
                DealStatus::Failed => summary.failed += 1,
                DealStatus::Expired => summary.expired += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeHot {
        objects: DashMap<String, Bytes>,
        restores: AtomicUsize,
        /// Node pool unreachable
        down: AtomicBool,
    }

    impl FakeHot {
        fn reachable(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(DurabilityError::NoHealthyNodes)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl HotStorage for FakeHot {
        async fn is_present(&self, cid: &str) -> Result<bool> {
            self.reachable()?;
            Ok(self.objects.contains_key(cid))
        }

        async fn read(&self, cid: &str) -> Result<Bytes> {
            self.reachable()?;
            self.objects
                .get(cid)
                .map(|b| b.value().clone())
                .ok_or_else(|| DurabilityError::NotFound(cid.to_string()))
        }

        async fn restore(&self, cid: &str, data: Option<Bytes>) -> Result<usize> {
            self.restores.fetch_add(1, Ordering::SeqCst);
            let data = data.ok_or_else(|| DurabilityError::NotFound(cid.to_string()))?;
            self.objects.insert(cid.to_string(), data);
            Ok(3)
        }
    }

    struct Harness {
        manager: ArchivalManager,
        hot: Arc<FakeHot>,
        client: Arc<SimulatedArchivalClient>,
        dir: TempDir,
    }

    fn simulated(dir: &TempDir) -> Arc<SimulatedArchivalClient> {
        Arc::new(SimulatedArchivalClient::persistent(dir.path().join("simulated")))
    }

    fn config(dir: &TempDir) -> ArchivalConfig {
        ArchivalConfig {
            data_dir: dir.path().to_path_buf(),
            ..ArchivalConfig::default()
        }
    }

    async fn harness(config_fn: impl FnOnce(&mut ArchivalConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config_fn(&mut config);
        let hot = Arc::new(FakeHot::default());
        let client = simulated(&dir);
        let manager = ArchivalManager::new(config, client.clone(), hot.clone(), EventBus::default())
            .await
            .unwrap();
        Harness {
            manager,
            hot,
            client,
            dir,
        }
    }

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"cold"));

        assert!(h.manager.archive("c1", "bafy1", 4).await.unwrap());
        assert!(h.manager.archive("c1", "bafy1", 4).await.unwrap());
        assert_eq!(h.manager.deals().len(), 1);

        h.manager.process_scheduled_deals().await.unwrap();
        h.manager.check_pending_deals().await.unwrap();
        assert!(h.manager.is_archived("bafy1"));

        assert!(h.manager.archive("c1", "bafy1", 4).await.unwrap());
        assert_eq!(h.client.deal_count(), 1);
        assert_eq!(h.manager.summary().active, 1);
    }

    #[tokio::test]
    async fn test_missing_inputs_and_miners() {
        let h = harness(|c| c.miners.clear()).await;
        assert!(matches!(
            h.manager.archive("", "bafy1", 0).await,
            Err(DurabilityError::InvalidRequest(_))
        ));
        match h.manager.archive("c1", "bafy1", 0).await {
            Err(DurabilityError::DealFailed(message)) => assert_eq!(message, "No miners available"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deal_lifecycle() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"cold"));
        h.manager.archive("c1", "bafy1", 4).await.unwrap();

        let deal = h.manager.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Scheduled);
        assert_eq!(deal.price, "0");
        assert_eq!(deal.expires_at - deal.created_at, 180 * DAY_MILLIS);

        let run = h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(run.succeeded, 1);
        let deal = h.manager.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Pending);
        assert!(deal.deal_ref.is_some());

        let run = h.manager.check_pending_deals().await.unwrap();
        assert_eq!(run.succeeded, 1);
        let deal = h.manager.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Active);
        assert!(deal.deal_id.is_some());
        assert!(deal.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_hot_content_fails_deal() {
        let h = harness(|_| {}).await;
        h.manager.archive("c1", "bafygone", 4).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();

        let deal = h.manager.deal("bafygone").unwrap();
        assert_eq!(deal.status, DealStatus::Failed);
        assert!(deal.error_message.unwrap().contains("Content not found in hot storage"));

        // A failed deal does not block a new attempt
        h.hot.objects.insert("bafygone".into(), Bytes::from_static(b"back"));
        h.manager.archive("c1", "bafygone", 4).await.unwrap();
        assert_eq!(h.manager.deal("bafygone").unwrap().status, DealStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_submission_and_poll_errors_fail_deal() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"a"));
        h.hot.objects.insert("bafy2".into(), Bytes::from_static(b"b"));

        h.manager.archive("c1", "bafy1", 1).await.unwrap();
        h.client.set_failing(true);
        h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(h.manager.deal("bafy1").unwrap().status, DealStatus::Failed);

        h.client.set_failing(false);
        h.manager.archive("c2", "bafy2", 1).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();
        h.client.set_failing(true);
        h.manager.check_pending_deals().await.unwrap();
        assert_eq!(h.manager.deal("bafy2").unwrap().status, DealStatus::Failed);
        assert_eq!(h.manager.summary().failed, 2);
    }

    #[tokio::test]
    async fn test_expired_deals() {
        let h = harness(|c| c.storage_days = 0).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"short"));
        h.manager.archive("c1", "bafy1", 5).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();
        h.manager.check_pending_deals().await.unwrap();

        assert_eq!(h.manager.deal("bafy1").unwrap().status, DealStatus::Expired);
        assert!(!h.manager.is_archived("bafy1"));
    }

    #[tokio::test]
    async fn test_busy_pass_is_skipped() {
        let h = harness(|_| {}).await;
        let _held = h.manager.worker_lock.try_lock().unwrap();
        assert!(h.manager.process_scheduled_deals().await.unwrap().skipped);
        assert!(h.manager.check_pending_deals().await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_retrieve() {
        let h = harness(|_| {}).await;
        assert!(!h.manager.retrieve("bafy1").await.unwrap());

        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"cold bytes"));
        h.manager.archive("c1", "bafy1", 10).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();
        h.manager.check_pending_deals().await.unwrap();

        // Still hot: no archival round trip
        h.client.set_failing(true);
        assert!(h.manager.retrieve("bafy1").await.unwrap());
        assert_eq!(h.hot.restores.load(Ordering::SeqCst), 0);

        h.client.set_failing(false);
        h.hot.objects.remove("bafy1");
        assert!(h.manager.retrieve("bafy1").await.unwrap());
        assert_eq!(h.hot.restores.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.hot.objects.get("bafy1").map(|b| b.value().clone()),
            Some(Bytes::from_static(b"cold bytes"))
        );
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"persist"));
        h.manager.archive("c1", "bafy1", 7).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();

        // A new process: fresh client and manager over the same data directory
        let reopened = ArchivalManager::new(
            config(&h.dir),
            simulated(&h.dir),
            h.hot.clone(),
            EventBus::default(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.load().await.unwrap(), 1);

        let deal = reopened.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Pending);
        assert_eq!(deal.deal_ref, h.manager.deal("bafy1").unwrap().deal_ref);

        reopened.check_pending_deals().await.unwrap();
        assert!(reopened.is_archived("bafy1"));

        h.hot.objects.remove("bafy1");
        assert!(reopened.retrieve("bafy1").await.unwrap());
        assert_eq!(
            h.hot.objects.get("bafy1").map(|b| b.value().clone()),
            Some(Bytes::from_static(b"persist"))
        );
    }

    #[tokio::test]
    async fn test_unknown_deal_ref_keeps_deal_pending() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"persist"));
        h.manager.archive("c1", "bafy1", 7).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();

        // A client that never saw the submission
        let reopened = ArchivalManager::new(
            config(&h.dir),
            Arc::new(SimulatedArchivalClient::new()),
            h.hot.clone(),
            EventBus::default(),
        )
        .await
        .unwrap();
        reopened.load().await.unwrap();
        let run = reopened.check_pending_deals().await.unwrap();
        assert_eq!(run.failed, 0);

        let deal = reopened.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Pending);
        assert!(deal.error_message.is_none());
        assert!(deal.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_hot_storage_outage_defers_submission() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"warm"));
        h.manager.archive("c1", "bafy1", 4).await.unwrap();

        h.hot.down.store(true, Ordering::SeqCst);
        let run = h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(run.deferred, 1);
        assert_eq!(run.failed, 0);
        let deal = h.manager.deal("bafy1").unwrap();
        assert_eq!(deal.status, DealStatus::Scheduled);
        assert!(deal.error_message.is_none());
        assert_eq!(h.client.deal_count(), 0);

        h.hot.down.store(false, Ordering::SeqCst);
        let run = h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(run.succeeded, 1);
        assert_eq!(h.manager.deal("bafy1").unwrap().status, DealStatus::Pending);
    }

    #[tokio::test]
    async fn test_retrieve_reports_hot_storage_outage() {
        let h = harness(|_| {}).await;
        h.hot.objects.insert("bafy1".into(), Bytes::from_static(b"warm"));
        h.manager.archive("c1", "bafy1", 4).await.unwrap();
        h.manager.process_scheduled_deals().await.unwrap();
        h.manager.check_pending_deals().await.unwrap();

        h.hot.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.manager.retrieve("bafy1").await,
            Err(DurabilityError::NoHealthyNodes)
        ));
        assert_eq!(h.hot.restores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_does_not_stop_pass() {
        let h = harness(|_| {}).await;
        for cid in ["bafy1", "bafy2"] {
            h.hot.objects.insert(cid.into(), Bytes::from_static(b"data"));
            h.manager.archive("c1", cid, 4).await.unwrap();
        }

        let conn = rusqlite::Connection::open(h.manager.store.path()).unwrap();
        conn.execute("DROP TABLE deals", []).unwrap();

        let run = h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(run.succeeded, 2);
        assert_eq!(run.unsaved, 2);
        assert_eq!(h.manager.summary().pending, 2);

        // Nothing is submitted twice
        let run = h.manager.process_scheduled_deals().await.unwrap();
        assert_eq!(run.processed, 0);
        assert_eq!(h.client.deal_count(), 2);
    }

    #[tokio::test]
    async fn test_huge_storage_term_saturates() {
        let h = harness(|c| c.storage_days = u64::MAX).await;
        assert!(h.manager.archive("c1", "bafy1", 4).await.unwrap());
        assert_eq!(h.manager.deal("bafy1").unwrap().expires_at, u64::MAX);
    }
}
