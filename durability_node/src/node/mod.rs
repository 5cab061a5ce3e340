// Node health monitoring for the durability node
//
// This module maintains the pool of writable storage nodes, probes them on a
// fixed interval (and on demand before placement), and ranks them for read
// and write selection. A node is only marked unhealthy after several
// consecutive probe failures so a single blip does not cause flapping; one
// successful probe restores it.

pub mod client;
pub mod memory;

pub use client::{KuboNodeClient, NodeClient, NodeClientFactory, NodeIdentity, RepoStats};
pub use memory::{MemoryNetwork, MemoryNodeClient};

use crate::config::{HealthConfig, NodeConfig};
use crate::error::{DurabilityError, Result};
use crate::events::{DurabilityEvent, EventBus};
use crate::types::{now_millis, NodeId, Operation};

use futures::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Storage node as seen by the health monitor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNode {
    /// Node identifier
    pub id: NodeId,

    /// RPC endpoint
    pub endpoint: String,

    /// Optional region label
    pub region: Option<String>,

    /// Placement priority (0..=100)
    pub priority: u8,

    /// Whether the node is currently eligible for selection
    pub healthy: bool,

    /// Last probe time, unix millis
    pub last_checked_at: Option<u64>,

    /// Duration of the last successful probe in milliseconds
    pub latency_ms: u64,

    /// Failed probes since the last success
    pub consecutive_failures: u32,

    /// Connected peers reported by the last successful probe
    pub peer_count: usize,

    /// Repository size reported by the last successful probe
    pub repo_size_bytes: u64,

    /// Agent version reported by the last successful probe
    pub version: Option<String>,
}

impl StorageNode {
    fn from_config(config: &NodeConfig) -> Self {
        Self {
            id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            region: config.region.clone(),
            priority: config.priority.min(100),
            healthy: false,
            last_checked_at: None,
            latency_ms: 0,
            consecutive_failures: 0,
            peer_count: 0,
            repo_size_bytes: 0,
            version: None,
        }
    }

    /// Record a successful probe
    pub fn record_success(
        &mut self,
        latency_ms: u64,
        identity: &NodeIdentity,
        stats: &RepoStats,
        peers: usize,
    ) {
        self.healthy = true;
        self.consecutive_failures = 0;
        self.latency_ms = latency_ms;
        self.last_checked_at = Some(now_millis());
        self.peer_count = peers;
        self.repo_size_bytes = stats.repo_size;
        if !identity.agent_version.is_empty() {
            self.version = Some(identity.agent_version.clone());
        }
    }

    /// Record a failed or timed-out probe
    pub fn record_failure(&mut self, failure_threshold: u32) {
        self.consecutive_failures += 1;
        self.last_checked_at = Some(now_millis());
        if self.consecutive_failures >= failure_threshold {
            self.healthy = false;
        }
    }
}

/// Result of probing one node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub healthy: bool,
    pub latency_ms: u64,
    pub consecutive_failures: u32,
    pub peer_count: usize,
    pub repo_size_bytes: u64,
    pub version: Option<String>,
    pub checked_at: Option<u64>,
    /// Error from this probe, if it failed
    pub error: Option<String>,
}

impl NodeHealth {
    fn from_node(node: &StorageNode, error: Option<String>) -> Self {
        Self {
            node_id: node.id.clone(),
            healthy: node.healthy,
            latency_ms: node.latency_ms,
            consecutive_failures: node.consecutive_failures,
            peer_count: node.peer_count,
            repo_size_bytes: node.repo_size_bytes,
            version: node.version.clone(),
            checked_at: node.last_checked_at,
            error,
        }
    }
}

/// Fleet-wide health summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetHealthSummary {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    /// Mean probe latency over healthy nodes
    pub average_latency_ms: f64,
    /// Completion time of the last full probe, unix millis
    pub last_health_check: Option<u64>,
    pub nodes: Vec<NodeHealth>,
}

/// Node pool entry; the client handle never leaves the monitor except by clone
struct NodeEntry {
    node: StorageNode,
    client: Arc<dyn NodeClient>,
}

/// Health monitor for the storage node pool
pub struct NodeHealthMonitor {
    /// Node pool
    nodes: Arc<RwLock<HashMap<NodeId, NodeEntry>>>,

    /// Probe configuration
    config: HealthConfig,

    /// Minimum priority preferred for write placement
    write_priority_threshold: u8,

    /// Builds clients for configured endpoints
    factory: NodeClientFactory,

    /// Start of the last full probe cycle
    last_full_probe: parking_lot::Mutex<Option<(Instant, u64)>>,

    /// Event bus
    events: EventBus,
}

impl NodeHealthMonitor {
    /// Create a new monitor with an empty pool
    pub fn new(config: HealthConfig, write_priority_threshold: u8, events: EventBus) -> Self {
        let factory = NodeClientFactory::new(config.probe_timeout());
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            config,
            write_priority_threshold,
            factory,
            last_full_probe: parking_lot::Mutex::new(None),
            events,
        }
    }

    /// Timeout applied to a single probe or presence query
    pub fn probe_timeout(&self) -> Duration {
        self.config.probe_timeout()
    }

    /// Shared network for nodes configured with `memory://` endpoints
    pub fn memory_network(&self) -> MemoryNetwork {
        self.factory.memory_network()
    }

    /// Register a node from configuration, building its client
    pub async fn register_node(&self, config: NodeConfig) -> Result<()> {
        let client = self.factory.create_client(&config)?;
        self.register_node_with_client(config, client).await
    }

    /// Register a node with an explicit client
    pub async fn register_node_with_client(
        &self,
        config: NodeConfig,
        client: Arc<dyn NodeClient>,
    ) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&config.id) {
            return Err(DurabilityError::InvalidRequest(format!(
                "Node {} is already registered",
                config.id
            )));
        }

        info!("Registering storage node {} at {}", config.id, config.endpoint);
        nodes.insert(
            config.id.clone(),
            NodeEntry {
                node: StorageNode::from_config(&config),
                client,
            },
        );
        Ok(())
    }

    /// Probe one node: identity, storage stats and peer count under one timeout
    pub async fn probe_one(&self, node_id: &str) -> Result<NodeHealth> {
        let client = self
            .client(node_id)
            .await
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown node: {}", node_id)))?;

        let started = Instant::now();
        let probe = async {
            tokio::try_join!(client.identity(), client.repo_stats(), client.peer_count())
        };
        let outcome = match timeout(self.config.probe_timeout(), probe).await {
            Ok(result) => result,
            Err(_) => Err(DurabilityError::Timeout),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .get_mut(node_id)
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown node: {}", node_id)))?;
        let was_healthy = entry.node.healthy;

        let error = match outcome {
            Ok((identity, stats, peers)) => {
                entry.node.record_success(latency_ms, &identity, &stats, peers);
                debug!("Node {} healthy in {}ms ({} peers)", node_id, latency_ms, peers);
                None
            }
            Err(e) => {
                entry.node.record_failure(self.config.failure_threshold);
                warn!(
                    "Probe of node {} failed ({} consecutive): {}",
                    node_id, entry.node.consecutive_failures, e
                );
                Some(e.to_string())
            }
        };

        if was_healthy != entry.node.healthy {
            info!(
                "Node {} is now {}",
                node_id,
                if entry.node.healthy { "healthy" } else { "unhealthy" }
            );
            self.events.emit(DurabilityEvent::NodeHealthChanged {
                node_id: node_id.to_string(),
                healthy: entry.node.healthy,
            });
        }

        Ok(NodeHealth::from_node(&entry.node, error))
    }

    /// Probe every node concurrently and wait for all outcomes
    pub async fn probe_all(&self) -> FleetHealthSummary {
        let started_at = Instant::now();
        let ids: Vec<NodeId> = self.nodes.read().await.keys().cloned().collect();

        let results = join_all(ids.iter().map(|id| self.probe_one(id))).await;
        let mut probed: Vec<NodeHealth> = results.into_iter().filter_map(|r| r.ok()).collect();
        probed.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        *self.last_full_probe.lock() = Some((started_at, now_millis()));

        let summary = self.summarize(probed);
        info!(
            "Node probe complete: {}/{} healthy",
            summary.healthy_nodes, summary.total_nodes
        );
        summary
    }

    /// Probe the fleet if the last full probe is older than `max_age`
    pub async fn refresh_if_stale(&self, max_age: Duration) {
        let stale = match *self.last_full_probe.lock() {
            Some((at, _)) => at.elapsed() > max_age,
            None => true,
        };
        if stale {
            debug!("Node health is stale, probing before use");
            self.probe_all().await;
        }
    }

    /// Current summary without probing
    pub async fn summary(&self) -> FleetHealthSummary {
        let nodes = self.nodes.read().await;
        let mut health: Vec<NodeHealth> = nodes
            .values()
            .map(|e| NodeHealth::from_node(&e.node, None))
            .collect();
        health.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        drop(nodes);
        self.summarize(health)
    }

    fn summarize(&self, nodes: Vec<NodeHealth>) -> FleetHealthSummary {
        let healthy: Vec<&NodeHealth> = nodes.iter().filter(|n| n.healthy).collect();
        let average_latency_ms = if healthy.is_empty() {
            0.0
        } else {
            healthy.iter().map(|n| n.latency_ms as f64).sum::<f64>() / healthy.len() as f64
        };

        FleetHealthSummary {
            total_nodes: nodes.len(),
            healthy_nodes: healthy.len(),
            unhealthy_nodes: nodes.len() - healthy.len(),
            average_latency_ms,
            last_health_check: self.last_full_probe.lock().map(|(_, at)| at),
            nodes,
        }
    }

    /// Best nodes for an operation: healthy, priority descending, then latency ascending.
    ///
    /// Writes skip nodes below the priority threshold unless no healthy node
    /// clears it, in which case every healthy node is eligible.
    pub async fn best_nodes(&self, op: Operation, count: usize) -> Vec<StorageNode> {
        self.ranked(op)
            .await
            .into_iter()
            .take(count)
            .map(|(node, _)| node)
            .collect()
    }

    /// Every eligible node for an operation, best first, with its client
    pub async fn ranked(&self, op: Operation) -> Vec<(StorageNode, Arc<dyn NodeClient>)> {
        let nodes = self.nodes.read().await;
        let healthy: Vec<&NodeEntry> = nodes.values().filter(|e| e.node.healthy).collect();

        let mut eligible: Vec<&NodeEntry> = match op {
            Operation::Read => healthy,
            Operation::Write => {
                let above: Vec<&NodeEntry> = healthy
                    .iter()
                    .copied()
                    .filter(|e| e.node.priority >= self.write_priority_threshold)
                    .collect();
                if above.is_empty() {
                    healthy
                } else {
                    above
                }
            }
        };

        eligible.sort_by(|a, b| compare_nodes(&a.node, &b.node));
        eligible
            .into_iter()
            .map(|e| (e.node.clone(), e.client.clone()))
            .collect()
    }

    /// Healthy nodes with their clients, in no particular order
    pub async fn healthy_clients(&self) -> Vec<(NodeId, Arc<dyn NodeClient>)> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|e| e.node.healthy)
            .map(|e| (e.node.id.clone(), e.client.clone()))
            .collect()
    }

    /// Number of healthy nodes
    pub async fn healthy_count(&self) -> usize {
        self.nodes
            .read()
            .await
            .values()
            .filter(|e| e.node.healthy)
            .count()
    }

    /// Snapshot of every node, sorted by id
    pub async fn nodes(&self) -> Vec<StorageNode> {
        let mut nodes: Vec<StorageNode> = self
            .nodes
            .read()
            .await
            .values()
            .map(|e| e.node.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Client handle for a node
    pub async fn client(&self, node_id: &str) -> Option<Arc<dyn NodeClient>> {
        self.nodes
            .read()
            .await
            .get(node_id)
            .map(|e| e.client.clone())
    }
}

fn compare_nodes(a: &StorageNode, b: &StorageNode) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.latency_ms.cmp(&b.latency_ms))
        .then_with(|| a.id.cmp(&b.id))
}
