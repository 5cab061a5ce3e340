// Archival network clients
//
// `LotusArchivalClient` talks to a Lotus full node over JSON-RPC.
// `SimulatedArchivalClient` activates deals on first poll with deterministic
// deal references; it backs development setups and the test suite.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ArchivalConfig;
use crate::error::{DurabilityError, Result};

/// Epochs per day on mainnet (30 s blocks)
const EPOCHS_PER_DAY: u64 = 2880;

/// Lotus storage deal states
const STORAGE_DEAL_PROPOSAL_REJECTED: u64 = 2;
const STORAGE_DEAL_ACTIVE: u64 = 7;
const STORAGE_DEAL_EXPIRED: u64 = 8;
const STORAGE_DEAL_SLASHED: u64 = 9;
const STORAGE_DEAL_FAILING: u64 = 11;
const STORAGE_DEAL_ERROR: u64 = 26;

/// Deal submission
#[derive(Debug, Clone)]
pub struct DealProposal {
    pub cid: String,
    pub miner: String,
    pub size_bytes: u64,
    /// Price per epoch in attoFIL
    pub price: String,
    pub duration_days: u64,
    pub wallet: Option<String>,
    /// Object bytes read from hot storage
    pub payload: Bytes,
}

/// Deal state reported by the archival network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealState {
    Pending,
    Active { deal_id: Option<String> },
    Failed(String),
}

/// Client for an archival storage network
#[async_trait]
pub trait ArchivalClient: Send + Sync {
    fn name(&self) -> &str;

    /// Propose a deal; returns the deal reference
    async fn submit_deal(&self, proposal: &DealProposal) -> Result<String>;

    /// Current state of a submitted deal
    async fn deal_status(&self, deal_ref: &str) -> Result<DealState>;

    /// Retrieve archived content. `None` means the content was delivered to
    /// the node network and only needs re-pinning.
    async fn retrieve(&self, deal_ref: &str, miner: &str, cid: &str) -> Result<Option<Bytes>>;
}

/// Lotus JSON-RPC client
pub struct LotusArchivalClient {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct DealInfo {
    #[serde(rename = "State")]
    state: u64,
    #[serde(rename = "DealID", default)]
    deal_id: u64,
    #[serde(rename = "Message", default)]
    message: String,
}

impl LotusArchivalClient {
    pub fn new(config: &ArchivalConfig) -> Self {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            api_url: config.api_url.clone(),
            token: config.token.clone(),
            client,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!("Lotus call {} (id {})", method, id);

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| DurabilityError::Timeout)??;
        if !response.status().is_success() {
            return Err(DurabilityError::Network(format!(
                "Lotus {} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(error) = rpc.error {
            return Err(DurabilityError::DealFailed(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }
}

fn cid_link(cid: &str) -> Value {
    json!({ "/": cid })
}

#[async_trait]
impl ArchivalClient for LotusArchivalClient {
    fn name(&self) -> &str {
        "lotus"
    }

    async fn submit_deal(&self, proposal: &DealProposal) -> Result<String> {
        let wallet = proposal.wallet.as_deref().ok_or_else(|| {
            DurabilityError::Config("archival.wallet_address is required for Lotus deals".to_string())
        })?;

        // Lotus pulls the DAG from the node network by root CID
        let params = json!([{
            "Data": {
                "TransferType": "graphsync",
                "Root": cid_link(&proposal.cid),
            },
            "Wallet": wallet,
            "Miner": proposal.miner,
            "EpochPrice": proposal.price,
            "MinBlocksDuration": proposal.duration_days.saturating_mul(EPOCHS_PER_DAY),
        }]);
        let result = self.call("Filecoin.ClientStartDeal", params).await?;

        result
            .get("/")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DurabilityError::DealFailed("ClientStartDeal returned no proposal CID".to_string()))
    }

    async fn deal_status(&self, deal_ref: &str) -> Result<DealState> {
        let result = self
            .call("Filecoin.ClientGetDealInfo", json!([cid_link(deal_ref)]))
            .await?;
        let info: DealInfo = serde_json::from_value(result)?;

        Ok(match info.state {
            STORAGE_DEAL_ACTIVE => DealState::Active {
                deal_id: (info.deal_id > 0).then(|| info.deal_id.to_string()),
            },
            STORAGE_DEAL_PROPOSAL_REJECTED
            | STORAGE_DEAL_EXPIRED
            | STORAGE_DEAL_SLASHED
            | STORAGE_DEAL_FAILING
            | STORAGE_DEAL_ERROR => DealState::Failed(if info.message.is_empty() {
                format!("deal entered state {}", info.state)
            } else {
                info.message
            }),
            _ => DealState::Pending,
        })
    }

    async fn retrieve(&self, _deal_ref: &str, miner: &str, cid: &str) -> Result<Option<Bytes>> {
        let offer = self
            .call(
                "Filecoin.ClientMinerQueryOffer",
                json!([miner, cid_link(cid), Value::Null]),
            )
            .await?;
        if let Some(err) = offer.get("Err").and_then(Value::as_str).filter(|e| !e.is_empty()) {
            return Err(DurabilityError::DealFailed(format!("Retrieval offer refused: {}", err)));
        }

        let order = json!({
            "Root": cid_link(cid),
            "Size": offer.get("Size").cloned().unwrap_or(Value::Null),
            "Total": offer.get("MinPrice").cloned().unwrap_or(json!("0")),
            "UnsealPrice": offer.get("UnsealPrice").cloned().unwrap_or(json!("0")),
            "PaymentInterval": offer.get("PaymentInterval").cloned().unwrap_or(json!(0)),
            "PaymentIntervalIncrease": offer.get("PaymentIntervalIncrease").cloned().unwrap_or(json!(0)),
            "Miner": offer.get("Miner").cloned().unwrap_or(json!(miner)),
            "MinerPeer": offer.get("MinerPeer").cloned().unwrap_or(Value::Null),
        });
        self.call("Filecoin.ClientRetrieve", json!([order, Value::Null]))
            .await?;

        // Retrieved blocks land in the Lotus blockstore shared with the nodes
        Ok(None)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatedDeal {
    cid: String,
    deal_id: u64,
    #[serde(skip)]
    payload: Bytes,
}

/// Simulated archival network
///
/// With a directory, deals are written there (`<ref>.json` plus the payload
/// in `<ref>.bin`) so a restarted node can still poll and retrieve them.
#[derive(Default)]
pub struct SimulatedArchivalClient {
    deals: DashMap<String, SimulatedDeal>,
    dir: Option<PathBuf>,
    failing: AtomicBool,
}

impl SimulatedArchivalClient {
    /// Deals live only as long as this client
    pub fn new() -> Self {
        Self::default()
    }

    /// Deals are kept under `dir` and survive restarts
    pub fn persistent<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Deterministic deal reference for a CID and miner
    pub fn deal_ref_for(cid: &str, miner: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(cid.as_bytes());
        hasher.update(miner.as_bytes());
        format!("bafyreideal{}", hex::encode(&hasher.finalize().as_bytes()[..16]))
    }

    fn deal_id_for(deal_ref: &str) -> u64 {
        let hash = blake3::hash(deal_ref.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        1000 + u64::from_le_bytes(head) % 1_000_000
    }

    pub fn deal_count(&self) -> usize {
        self.deals.len()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DurabilityError::Network("simulated archival network is down".to_string()))
        } else {
            Ok(())
        }
    }

    async fn persist(&self, deal_ref: &str, deal: &SimulatedDeal) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        fs::create_dir_all(dir).await?;
        fs::write(dir.join(format!("{}.bin", deal_ref)), &deal.payload).await?;
        fs::write(
            dir.join(format!("{}.json", deal_ref)),
            serde_json::to_vec(deal)?,
        )
        .await?;
        Ok(())
    }

    /// Deal by reference, from memory or from the deal directory
    async fn lookup(&self, deal_ref: &str) -> Result<Option<SimulatedDeal>> {
        if let Some(deal) = self.deals.get(deal_ref) {
            return Ok(Some(deal.value().clone()));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let meta = match fs::read(dir.join(format!("{}.json", deal_ref))).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut deal: SimulatedDeal = serde_json::from_slice(&meta)?;
        deal.payload = Bytes::from(fs::read(dir.join(format!("{}.bin", deal_ref))).await?);
        self.deals.insert(deal_ref.to_string(), deal.clone());
        Ok(Some(deal))
    }
}

#[async_trait]
impl ArchivalClient for SimulatedArchivalClient {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn submit_deal(&self, proposal: &DealProposal) -> Result<String> {
        self.check()?;
        let deal_ref = Self::deal_ref_for(&proposal.cid, &proposal.miner);
        let deal = SimulatedDeal {
            cid: proposal.cid.clone(),
            deal_id: Self::deal_id_for(&deal_ref),
            payload: proposal.payload.clone(),
        };
        self.persist(&deal_ref, &deal).await?;
        self.deals.insert(deal_ref.clone(), deal);
        Ok(deal_ref)
    }

    async fn deal_status(&self, deal_ref: &str) -> Result<DealState> {
        self.check()?;
        // A reference we have no record of may still be propagating
        Ok(match self.lookup(deal_ref).await? {
            Some(deal) => DealState::Active {
                deal_id: Some(deal.deal_id.to_string()),
            },
            None => {
                debug!("Simulated deal {} not known yet", deal_ref);
                DealState::Pending
            }
        })
    }

    async fn retrieve(&self, deal_ref: &str, _miner: &str, cid: &str) -> Result<Option<Bytes>> {
        self.check()?;
        let deal = self
            .lookup(deal_ref)
            .await?
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown deal {}", deal_ref)))?;
        if deal.cid != cid {
            return Err(DurabilityError::DealFailed(format!(
                "Deal {} does not cover {}",
                deal_ref, cid
            )));
        }
        Ok(Some(deal.payload))
    }
}
