// Storage node clients
//
// The monitor and the replication engine talk to storage nodes only through
// the `NodeClient` trait. `KuboNodeClient` speaks the Kubo HTTP RPC API
// (`/api/v0/...`); `memory://` endpoints get an in-process node from
// `super::memory`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::memory::{MemoryNetwork, MemoryNodeClient};
use crate::config::NodeConfig;
use crate::error::{DurabilityError, Result};

/// Identity reported by a node's handshake call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Peer identifier
    pub peer_id: String,
    /// Agent version string
    pub agent_version: String,
}

/// Repository statistics reported by a node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RepoStats {
    /// Bytes used by the repository
    pub repo_size: u64,
    /// Number of stored objects
    pub num_objects: u64,
}

/// Client for one storage node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Identity/handshake call
    async fn identity(&self) -> Result<NodeIdentity>;

    /// Storage statistics call
    async fn repo_stats(&self) -> Result<RepoStats>;

    /// Number of connected peers
    async fn peer_count(&self) -> Result<usize>;

    /// Add bytes to the node and pin them; returns the CID
    async fn add(&self, data: Bytes) -> Result<String>;

    /// Pin an existing CID, fetching it from the network if needed
    async fn pin(&self, cid: &str) -> Result<()>;

    /// Remove a pin
    async fn unpin(&self, cid: &str) -> Result<()>;

    /// Whether the node currently pins the CID
    async fn is_pinned(&self, cid: &str) -> Result<bool>;

    /// Read the object bytes
    async fn cat(&self, cid: &str) -> Result<Bytes>;
}

/// Factory for creating node clients from configuration
pub struct NodeClientFactory {
    /// Shared block exchange for `memory://` nodes
    network: MemoryNetwork,
    /// Timeout applied to node RPC calls
    request_timeout: Duration,
}

impl NodeClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            network: MemoryNetwork::new(),
            request_timeout,
        }
    }

    /// Shared network backing every `memory://` node built by this factory
    pub fn memory_network(&self) -> MemoryNetwork {
        self.network.clone()
    }

    /// Create a client for the configured node
    pub fn create_client(&self, node: &NodeConfig) -> Result<Arc<dyn NodeClient>> {
        if let Some(name) = node.endpoint.strip_prefix("memory://") {
            debug!("Node {} uses in-process storage {}", node.id, name);
            return Ok(Arc::new(MemoryNodeClient::new(name, self.network.clone())));
        }

        let parsed = url::Url::parse(&node.endpoint).map_err(|e| {
            DurabilityError::Config(format!("Invalid endpoint for node {}: {}", node.id, e))
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(Arc::new(KuboNodeClient::new(
                &node.endpoint,
                self.request_timeout,
            ))),
            other => Err(DurabilityError::Config(format!(
                "Unsupported endpoint scheme {} for node {}",
                other, node.id
            ))),
        }
    }
}

/// Kubo HTTP RPC client
pub struct KuboNodeClient {
    /// Base endpoint, e.g. `http://127.0.0.1:5001`
    endpoint: String,
    /// HTTP client
    client: reqwest::Client,
    /// Timeout for one RPC call
    timeout: Duration,
}

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "AgentVersion", default)]
    agent_version: String,
}

#[derive(Deserialize)]
struct RepoStatResponse {
    #[serde(rename = "RepoSize", default)]
    repo_size: u64,
    #[serde(rename = "NumObjects", default)]
    num_objects: u64,
}

#[derive(Deserialize)]
struct SwarmPeersResponse {
    #[serde(rename = "Peers", default)]
    peers: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct PinLsResponse {
    #[serde(rename = "Keys", default)]
    keys: std::collections::HashMap<String, serde_json::Value>,
}

impl KuboNodeClient {
    /// Create a new Kubo client
    pub fn new(endpoint: &str, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            timeout: request_timeout,
        }
    }

    fn url(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.endpoint, command)
    }

    /// POST an RPC command and return the successful response
    async fn call(&self, command: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let request = self.client.post(self.url(command)).query(query).send();
        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| DurabilityError::Timeout)??;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DurabilityError::Network(format!(
                "{} {} returned HTTP {}: {}",
                self.endpoint, command, status, body
            )))
        }
    }
}

#[async_trait]
impl NodeClient for KuboNodeClient {
    async fn identity(&self) -> Result<NodeIdentity> {
        let response: IdResponse = self.call("id", &[]).await?.json().await?;
        Ok(NodeIdentity {
            peer_id: response.id,
            agent_version: response.agent_version,
        })
    }

    async fn repo_stats(&self) -> Result<RepoStats> {
        let response: RepoStatResponse = self.call("repo/stat", &[]).await?.json().await?;
        Ok(RepoStats {
            repo_size: response.repo_size,
            num_objects: response.num_objects,
        })
    }

    async fn peer_count(&self) -> Result<usize> {
        let response: SwarmPeersResponse = self.call("swarm/peers", &[]).await?.json().await?;
        Ok(response.peers.map(|p| p.len()).unwrap_or(0))
    }

    async fn add(&self, data: Bytes) -> Result<String> {
        debug!("Adding {} bytes to {}", data.len(), self.endpoint);

        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("blob");
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .client
            .post(self.url("add"))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send();

        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| DurabilityError::Timeout)??;
        if !response.status().is_success() {
            return Err(DurabilityError::Network(format!(
                "{} add returned HTTP {}",
                self.endpoint,
                response.status()
            )));
        }

        let added: AddResponse = response.json().await?;
        Ok(added.hash)
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        self.call("pin/add", &[("arg", cid)]).await?;
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        self.call("pin/rm", &[("arg", cid)]).await?;
        Ok(())
    }

    async fn is_pinned(&self, cid: &str) -> Result<bool> {
        // Kubo answers 500 "not pinned" for unknown CIDs
        let request = self
            .client
            .post(self.url("pin/ls"))
            .query(&[("arg", cid), ("type", "recursive")])
            .send();
        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| DurabilityError::Timeout)??;

        if response.status().is_success() {
            let listing: PinLsResponse = response.json().await?;
            Ok(!listing.keys.is_empty())
        } else if response.status().is_server_error() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("not pinned") {
                Ok(false)
            } else {
                Err(DurabilityError::Network(format!(
                    "{} pin/ls failed: {}",
                    self.endpoint, body
                )))
            }
        } else {
            Err(DurabilityError::Network(format!(
                "{} pin/ls returned HTTP {}",
                self.endpoint,
                response.status()
            )))
        }
    }

    async fn cat(&self, cid: &str) -> Result<Bytes> {
        let response = self.call("cat", &[("arg", cid)]).await?;
        Ok(response.bytes().await?)
    }
}
