// In-process storage nodes
//
// A `MemoryNetwork` stands in for the block exchange between nodes: any node
// can pin a CID that some node has added. Each `MemoryNodeClient` keeps its
// own pin set and can be switched offline or slowed down, which is how local
// development setups and the test suite exercise failure handling.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::client::{NodeClient, NodeIdentity, RepoStats};
use crate::error::{DurabilityError, Result};

/// Shared block store reachable by every memory node
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    blocks: Arc<DashMap<String, Bytes>>,
    members: Arc<AtomicUsize>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content identifier for a byte string
    pub fn cid_for(data: &[u8]) -> String {
        format!("bafkr{}", hex::encode(blake3::hash(data).as_bytes()))
    }

    /// Drop an object from the network entirely, as if every copy was garbage collected
    pub fn forget(&self, cid: &str) {
        self.blocks.remove(cid);
    }

    /// Whether any node could still serve the object
    pub fn contains(&self, cid: &str) -> bool {
        self.blocks.contains_key(cid)
    }

    /// Object bytes, if still present in the network
    pub fn get(&self, cid: &str) -> Option<Bytes> {
        self.blocks.get(cid).map(|b| b.value().clone())
    }

    fn put(&self, data: Bytes) -> String {
        let cid = Self::cid_for(&data);
        self.blocks.insert(cid.clone(), data);
        cid
    }
}

/// In-process storage node
pub struct MemoryNodeClient {
    name: String,
    network: MemoryNetwork,
    pins: DashSet<String>,
    online: AtomicBool,
    accept_pins: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryNodeClient {
    pub fn new(name: &str, network: MemoryNetwork) -> Self {
        network.members.fetch_add(1, Ordering::SeqCst);
        Self {
            name: name.to_string(),
            network,
            pins: DashSet::new(),
            online: AtomicBool::new(true),
            accept_pins: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Take the node on or off line; offline nodes fail every call
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make the node answer probes but refuse new pins and uploads
    pub fn set_accept_pins(&self, accept: bool) {
        self.accept_pins.store(accept, Ordering::SeqCst);
    }

    /// Artificial delay added to every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// CIDs pinned on this node
    pub fn pinned(&self) -> Vec<String> {
        self.pins.iter().map(|c| c.key().clone()).collect()
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DurabilityError::Network(format!("node {} is offline", self.name)))
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.accept_pins.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DurabilityError::Storage(format!(
                "node {} refused the write",
                self.name
            )))
        }
    }
}

#[async_trait]
impl NodeClient for MemoryNodeClient {
    async fn identity(&self) -> Result<NodeIdentity> {
        self.enter().await?;
        Ok(NodeIdentity {
            peer_id: format!("memory-{}", self.name),
            agent_version: concat!("durability-node-memory/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    async fn repo_stats(&self) -> Result<RepoStats> {
        self.enter().await?;
        let repo_size = self
            .pins
            .iter()
            .filter_map(|cid| self.network.blocks.get(cid.key()).map(|b| b.len() as u64))
            .sum();
        Ok(RepoStats {
            repo_size,
            num_objects: self.pins.len() as u64,
        })
    }

    async fn peer_count(&self) -> Result<usize> {
        self.enter().await?;
        Ok(self.network.members.load(Ordering::SeqCst).saturating_sub(1))
    }

    async fn add(&self, data: Bytes) -> Result<String> {
        self.enter().await?;
        self.check_writable()?;
        let cid = self.network.put(data);
        self.pins.insert(cid.clone());
        Ok(cid)
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        self.enter().await?;
        self.check_writable()?;
        if !self.network.contains(cid) {
            return Err(DurabilityError::NotFound(format!(
                "{} could not find {} in the network",
                self.name, cid
            )));
        }
        self.pins.insert(cid.to_string());
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        self.enter().await?;
        self.pins.remove(cid);
        Ok(())
    }

    async fn is_pinned(&self, cid: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self.pins.contains(cid))
    }

    async fn cat(&self, cid: &str) -> Result<Bytes> {
        self.enter().await?;
        if !self.pins.contains(cid) {
            return Err(DurabilityError::NotFound(format!(
                "{} does not hold {}",
                self.name, cid
            )));
        }
        self.network
            .get(cid)
            .ok_or_else(|| DurabilityError::NotFound(format!("{} is gone from the network", cid)))
    }
}
