// Replica placement for the durability node
//
// New content is uploaded to one primary node to obtain its CID and then
// pinned concurrently on the remaining targets. Repair tops an existing CID up
// to a target replica count by walking down the ranked node list. Presence is
// always checked live against the nodes, never from a cache.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::archive::HotStorage;
use crate::config::ReplicationConfig;
use crate::error::{DurabilityError, Result};
use crate::node::{NodeClient, NodeHealthMonitor};
use crate::types::{now_millis, NodeId, Operation};

/// Outcome of an initial placement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResult {
    pub cid: String,
    /// Nodes holding the object, primary first
    pub placed_node_ids: Vec<NodeId>,
    pub size_bytes: u64,
    /// Replicas requested
    pub min_replicas: usize,
    /// Set when fewer than `min_replicas` nodes took the object
    pub warning: Option<String>,
}

impl PlacementResult {
    pub fn replicas(&self) -> usize {
        self.placed_node_ids.len()
    }
}

/// Placement options
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlacementOptions {
    /// Replicas to create; the configured minimum when zero
    pub min_replicas: usize,
    /// Healthy nodes to use before the ranked list
    pub preferred_nodes: Vec<NodeId>,
}

/// Live presence of one CID across the healthy nodes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySnapshot {
    pub cid: String,
    pub available_node_ids: Vec<NodeId>,
    /// Healthy nodes queried
    pub nodes_checked: usize,
    pub replication_factor: usize,
    pub checked_at: u64,
}

impl AvailabilitySnapshot {
    fn new(cid: &str, holders: BTreeSet<NodeId>, nodes_checked: usize) -> Self {
        let available_node_ids: Vec<NodeId> = holders.into_iter().collect();
        Self {
            cid: cid.to_string(),
            replication_factor: available_node_ids.len(),
            available_node_ids,
            nodes_checked,
            checked_at: now_millis(),
        }
    }
}

/// Replication engine over the node pool
pub struct ReplicationEngine {
    monitor: Arc<NodeHealthMonitor>,
    config: ReplicationConfig,
}

impl ReplicationEngine {
    pub fn new(monitor: Arc<NodeHealthMonitor>, config: ReplicationConfig) -> Self {
        Self { monitor, config }
    }

    /// Configured replica minimum
    pub fn min_replicas(&self) -> usize {
        self.config.min_replicas
    }

    /// Configured replica maximum
    pub fn max_replicas(&self) -> usize {
        self.config.max_replicas
    }

    /// Place new content on `min_replicas` nodes
    pub async fn place_initial(&self, data: Bytes, min_replicas: usize) -> Result<PlacementResult> {
        self.place_with(
            data,
            &PlacementOptions {
                min_replicas,
                preferred_nodes: Vec::new(),
            },
        )
        .await
    }

    /// Place new content, trying preferred nodes first
    ///
    /// # Arguments
    ///
    /// * `data` - Object bytes
    /// * `options` - Replica count and preferred nodes
    ///
    /// # Returns
    ///
    /// The CID and the nodes now holding it. Falling short of the requested
    /// replica count is reported through `warning`, not as an error.
    pub async fn place_with(&self, data: Bytes, options: &PlacementOptions) -> Result<PlacementResult> {
        let min_replicas = if options.min_replicas == 0 {
            self.config.min_replicas
        } else {
            options.min_replicas
        };
        self.monitor.refresh_if_stale(self.config.fresh_within()).await;

        let targets = self.targets(&options.preferred_nodes, min_replicas).await;
        if targets.is_empty() {
            return Err(DurabilityError::NoHealthyNodes);
        }

        let size_bytes = data.len() as u64;
        let pin_timeout = self.config.pin_timeout();

        let mut primary = None;
        for (index, (node_id, client)) in targets.iter().enumerate() {
            match timeout(pin_timeout, client.add(data.clone())).await {
                Ok(Ok(cid)) => {
                    debug!("Uploaded {} bytes to primary {} as {}", size_bytes, node_id, cid);
                    primary = Some((index, cid));
                    break;
                }
                Ok(Err(e)) => warn!("Upload to {} failed, promoting next target: {}", node_id, e),
                Err(_) => warn!("Upload to {} timed out, promoting next target", node_id),
            }
        }
        let (primary_index, cid) = primary.ok_or_else(|| {
            DurabilityError::Unavailable("Upload failed on every target node".to_string())
        })?;

        let replicas = &targets[primary_index + 1..];
        let pins = join_all(replicas.iter().map(|(node_id, client)| {
            let cid = cid.clone();
            async move {
                match timeout(pin_timeout, client.pin(&cid)).await {
                    Ok(Ok(())) => Some(node_id.clone()),
                    Ok(Err(e)) => {
                        warn!("Pinning {} on {} failed: {}", cid, node_id, e);
                        None
                    }
                    Err(_) => {
                        warn!("Pinning {} on {} timed out", cid, node_id);
                        None
                    }
                }
            }
        }))
        .await;

        let mut placed_node_ids = vec![targets[primary_index].0.clone()];
        placed_node_ids.extend(pins.into_iter().flatten());

        let warning = (placed_node_ids.len() < min_replicas).then(|| {
            DurabilityError::InsufficientReplicas {
                cid: cid.clone(),
                achieved: placed_node_ids.len(),
                required: min_replicas,
            }
            .to_string()
        });
        match &warning {
            Some(w) => warn!("{}", w),
            None => info!("Placed {} on {} nodes", cid, placed_node_ids.len()),
        }

        Ok(PlacementResult {
            cid,
            placed_node_ids,
            size_bytes,
            min_replicas,
            warning,
        })
    }

    /// Preferred healthy nodes first, then the ranked write list, up to `count`
    async fn targets(&self, preferred: &[NodeId], count: usize) -> Vec<(NodeId, Arc<dyn NodeClient>)> {
        let healthy = self.monitor.ranked(Operation::Read).await;
        let mut targets: Vec<(NodeId, Arc<dyn NodeClient>)> = Vec::new();

        for id in preferred {
            if let Some((node, client)) = healthy.iter().find(|(n, _)| &n.id == id) {
                if !targets.iter().any(|(t, _)| t == id) {
                    targets.push((node.id.clone(), client.clone()));
                }
            }
        }

        for (node, client) in self.monitor.ranked(Operation::Write).await {
            if targets.len() >= count {
                break;
            }
            if !targets.iter().any(|(t, _)| *t == node.id) {
                targets.push((node.id, client));
            }
        }

        targets.truncate(count.max(1));
        targets
    }

    /// Query every healthy node for the CID
    pub async fn check_availability(&self, cid: &str) -> Result<AvailabilitySnapshot> {
        let nodes = self.monitor.healthy_clients().await;
        if nodes.is_empty() {
            return Err(DurabilityError::NoHealthyNodes);
        }

        let probe_timeout = self.monitor.probe_timeout();
        let answers = join_all(nodes.iter().map(|(node_id, client)| async move {
            let answer = match timeout(probe_timeout, client.is_pinned(cid)).await {
                Ok(result) => result,
                Err(_) => Err(DurabilityError::Timeout),
            };
            (node_id.clone(), answer)
        }))
        .await;

        let mut holders = BTreeSet::new();
        let mut errors = 0;
        for (node_id, answer) in answers {
            match answer {
                Ok(true) => {
                    holders.insert(node_id);
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("Presence check of {} on {} failed: {}", cid, node_id, e);
                    errors += 1;
                }
            }
        }

        if errors == nodes.len() {
            return Err(DurabilityError::Unavailable(format!(
                "No node answered the presence check for {}",
                cid
            )));
        }
        Ok(AvailabilitySnapshot::new(cid, holders, nodes.len()))
    }

    /// Top a CID up to `target` replicas
    pub async fn ensure_replication(&self, cid: &str, target: usize) -> Result<AvailabilitySnapshot> {
        self.monitor.refresh_if_stale(self.config.fresh_within()).await;
        let snapshot = self.check_availability(cid).await?;
        if snapshot.replication_factor >= target {
            return Ok(snapshot);
        }

        let mut holders: BTreeSet<NodeId> = snapshot.available_node_ids.iter().cloned().collect();

        // Write-eligible nodes first, then any other healthy node
        let mut candidates: Vec<(NodeId, Arc<dyn NodeClient>)> = Vec::new();
        let ranked = self
            .monitor
            .ranked(Operation::Write)
            .await
            .into_iter()
            .chain(self.monitor.ranked(Operation::Read).await);
        for (node, client) in ranked {
            if !holders.contains(&node.id) && !candidates.iter().any(|(c, _)| *c == node.id) {
                candidates.push((node.id, client));
            }
        }

        let pin_timeout = self.config.pin_timeout();
        let mut remaining = candidates.into_iter();
        while holders.len() < target {
            let batch: Vec<(NodeId, Arc<dyn NodeClient>)> =
                remaining.by_ref().take(target - holders.len()).collect();
            if batch.is_empty() {
                break;
            }

            let pinned = join_all(batch.iter().map(|(node_id, client)| async move {
                match timeout(pin_timeout, client.pin(cid)).await {
                    Ok(Ok(())) => Some(node_id.clone()),
                    Ok(Err(e)) => {
                        warn!("Replicating {} to {} failed: {}", cid, node_id, e);
                        None
                    }
                    Err(_) => {
                        warn!("Replicating {} to {} timed out", cid, node_id);
                        None
                    }
                }
            }))
            .await;
            holders.extend(pinned.into_iter().flatten());
        }

        let required = target.min(self.monitor.healthy_count().await);
        if holders.len() < required {
            return Err(DurabilityError::InsufficientReplicas {
                cid: cid.to_string(),
                achieved: holders.len(),
                required,
            });
        }

        info!("{} now has {} replicas (target {})", cid, holders.len(), target);
        Ok(AvailabilitySnapshot::new(cid, holders, snapshot.nodes_checked))
    }

    /// Read an object from the first healthy node that serves it
    pub async fn read(&self, cid: &str) -> Result<Bytes> {
        let nodes = self.monitor.ranked(Operation::Read).await;
        if nodes.is_empty() {
            return Err(DurabilityError::NoHealthyNodes);
        }

        let mut unreachable = 0;
        for (node, client) in nodes {
            match timeout(self.config.pin_timeout(), client.cat(cid)).await {
                Ok(Ok(bytes)) => return Ok(bytes),
                Ok(Err(DurabilityError::NotFound(_))) => {}
                Ok(Err(e)) => {
                    debug!("Reading {} from {} failed: {}", cid, node.id, e);
                    unreachable += 1;
                }
                Err(_) => unreachable += 1,
            }
        }

        if unreachable > 0 {
            Err(DurabilityError::Unavailable(format!(
                "{} could not be read from any reachable node",
                cid
            )))
        } else {
            Err(DurabilityError::NotFound(format!("{} is not held by any node", cid)))
        }
    }

    /// Unpin a CID everywhere; returns the nodes that dropped it
    pub async fn remove(&self, cid: &str) -> Result<Vec<NodeId>> {
        let nodes = self.monitor.healthy_clients().await;
        let probe_timeout = self.monitor.probe_timeout();

        let removed = join_all(nodes.iter().map(|(node_id, client)| async move {
            match timeout(probe_timeout, client.is_pinned(cid)).await {
                Ok(Ok(true)) => {}
                _ => return None,
            }
            match timeout(self.config.pin_timeout(), client.unpin(cid)).await {
                Ok(Ok(())) => Some(node_id.clone()),
                _ => {
                    warn!("Unpinning {} on {} failed", cid, node_id);
                    None
                }
            }
        }))
        .await;

        let mut removed: Vec<NodeId> = removed.into_iter().flatten().collect();
        removed.sort();
        info!("Unpinned {} from {} nodes", cid, removed.len());
        Ok(removed)
    }
}

#[async_trait]
impl HotStorage for ReplicationEngine {
    async fn is_present(&self, cid: &str) -> Result<bool> {
        Ok(self.check_availability(cid).await?.replication_factor > 0)
    }

    async fn read(&self, cid: &str) -> Result<Bytes> {
        ReplicationEngine::read(self, cid).await
    }

    async fn restore(&self, cid: &str, data: Option<Bytes>) -> Result<usize> {
        match data {
            Some(bytes) => {
                let placed = self.place_initial(bytes, self.config.min_replicas).await?;
                if placed.cid != cid {
                    warn!("Restored {} under a different CID {}", cid, placed.cid);
                }
                Ok(placed.replicas())
            }
            None => Ok(self
                .ensure_replication(cid, self.config.min_replicas)
                .await?
                .replication_factor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, NodeConfig};
    use crate::events::EventBus;
    use crate::node::{MemoryNetwork, MemoryNodeClient};

    struct Fleet {
        engine: ReplicationEngine,
        monitor: Arc<NodeHealthMonitor>,
        nodes: Vec<Arc<MemoryNodeClient>>,
        network: MemoryNetwork,
    }

    async fn fleet(priorities: &[u8]) -> Fleet {
        let monitor = Arc::new(NodeHealthMonitor::new(
            HealthConfig::default(),
            80,
            EventBus::default(),
        ));
        let network = monitor.memory_network();
        let mut nodes = Vec::new();
        for (i, priority) in priorities.iter().enumerate() {
            let id = format!("node-{}", i);
            let client = Arc::new(MemoryNodeClient::new(&id, network.clone()));
            monitor
                .register_node_with_client(
                    NodeConfig {
                        id: id.clone(),
                        endpoint: format!("memory://{}", id),
                        region: None,
                        priority: *priority,
                    },
                    client.clone(),
                )
                .await
                .unwrap();
            nodes.push(client);
        }
        monitor.probe_all().await;

        Fleet {
            engine: ReplicationEngine::new(monitor.clone(), ReplicationConfig::default()),
            monitor,
            nodes,
            network,
        }
    }

    #[tokio::test]
    async fn test_place_initial_reaches_min_replicas() {
        let fleet = fleet(&[100, 90, 80, 70]).await;
        let data = Bytes::from_static(b"durable bytes");
        let placed = fleet.engine.place_initial(data.clone(), 3).await.unwrap();

        assert_eq!(placed.cid, MemoryNetwork::cid_for(&data));
        assert_eq!(placed.placed_node_ids, vec!["node-0", "node-1", "node-2"]);
        assert!(placed.warning.is_none());
        assert_eq!(fleet.engine.read(&placed.cid).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_primary_failure_promotes_next_target() {
        let fleet = fleet(&[100, 90, 80]).await;
        fleet.nodes[0].set_accept_pins(false);

        let placed = fleet
            .engine
            .place_initial(Bytes::from_static(b"x"), 3)
            .await
            .unwrap();
        assert_eq!(placed.placed_node_ids, vec!["node-1", "node-2"]);
        assert!(placed.warning.unwrap().contains("achieved 2 of 3"));
    }

    #[tokio::test]
    async fn test_every_upload_failing_is_unavailable() {
        let fleet = fleet(&[100, 90]).await;
        for node in &fleet.nodes {
            node.set_accept_pins(false);
        }
        assert!(matches!(
            fleet.engine.place_initial(Bytes::from_static(b"x"), 2).await,
            Err(DurabilityError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_preferred_nodes_come_first() {
        let fleet = fleet(&[100, 90, 10]).await;
        let options = PlacementOptions {
            min_replicas: 2,
            preferred_nodes: vec!["node-2".to_string()],
        };
        let placed = fleet
            .engine
            .place_with(Bytes::from_static(b"pref"), &options)
            .await
            .unwrap();
        assert_eq!(placed.placed_node_ids, vec!["node-2", "node-0"]);
    }

    #[tokio::test]
    async fn test_no_healthy_nodes() {
        let fleet = fleet(&[]).await;
        assert!(matches!(
            fleet.engine.place_initial(Bytes::from_static(b"x"), 3).await,
            Err(DurabilityError::NoHealthyNodes)
        ));
    }

    #[tokio::test]
    async fn test_ensure_replication_tops_up() {
        let fleet = fleet(&[100, 90, 80, 20]).await;
        let placed = fleet
            .engine
            .place_initial(Bytes::from_static(b"repair me"), 1)
            .await
            .unwrap();

        let snapshot = fleet.engine.ensure_replication(&placed.cid, 4).await.unwrap();
        assert_eq!(snapshot.replication_factor, 4);

        let live = fleet.engine.check_availability(&placed.cid).await.unwrap();
        assert_eq!(live.available_node_ids.len(), 4);
        assert_eq!(live.nodes_checked, 4);
    }

    #[tokio::test]
    async fn test_ensure_replication_caps_at_healthy_nodes() {
        let fleet = fleet(&[100, 90]).await;
        let placed = fleet
            .engine
            .place_initial(Bytes::from_static(b"small fleet"), 1)
            .await
            .unwrap();

        // Only two nodes exist, so a target of five succeeds with two
        let snapshot = fleet.engine.ensure_replication(&placed.cid, 5).await.unwrap();
        assert_eq!(snapshot.replication_factor, 2);
    }

    #[tokio::test]
    async fn test_ensure_replication_fails_when_nodes_refuse() {
        let fleet = fleet(&[100, 90, 80]).await;
        let placed = fleet
            .engine
            .place_initial(Bytes::from_static(b"refused"), 1)
            .await
            .unwrap();
        fleet.nodes[1].set_accept_pins(false);
        fleet.nodes[2].set_accept_pins(false);

        match fleet.engine.ensure_replication(&placed.cid, 3).await {
            Err(DurabilityError::InsufficientReplicas { achieved, required, .. }) => {
                assert_eq!(achieved, 1);
                assert_eq!(required, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_and_restore() {
        let fleet = fleet(&[100, 90, 80]).await;
        let data = Bytes::from_static(b"restore me");
        let placed = fleet.engine.place_initial(data.clone(), 3).await.unwrap();

        let removed = fleet.engine.remove(&placed.cid).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!fleet.engine.is_present(&placed.cid).await.unwrap());
        assert!(matches!(
            fleet.engine.read(&placed.cid).await,
            Err(DurabilityError::NotFound(_))
        ));

        // The block exchange still has it, so a re-pin is enough
        assert!(fleet.network.contains(&placed.cid));
        let replicas = fleet.engine.restore(&placed.cid, None).await.unwrap();
        assert_eq!(replicas, 3);

        fleet.engine.remove(&placed.cid).await.unwrap();
        fleet.network.forget(&placed.cid);
        let replicas = fleet.engine.restore(&placed.cid, Some(data.clone())).await.unwrap();
        assert_eq!(replicas, 3);
        assert_eq!(fleet.engine.read(&placed.cid).await.unwrap(), data);
        assert_eq!(fleet.monitor.healthy_count().await, 3);
    }
}
