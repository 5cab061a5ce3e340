// Pinning services
//
// A pin request fans out to every registered pinning backend: our own node
// pool through the replication engine, and optionally Pinata. The registry
// aggregates per-service results and remembers which services hold each CID.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::PinningConfig;
use crate::error::{DurabilityError, Result};
use crate::replication::ReplicationEngine;
use crate::types::now_millis;

/// A backend that can keep a CID pinned
#[async_trait]
pub trait PinningService: Send + Sync {
    /// Service name used in results and records
    fn name(&self) -> &str;

    /// Whether the service is configured and usable
    fn is_available(&self) -> bool;

    async fn pin(&self, cid: &str) -> Result<()>;

    async fn unpin(&self, cid: &str) -> Result<()>;
}

/// Pins on our own node pool
pub struct NodePoolPinning {
    engine: Arc<ReplicationEngine>,
}

impl NodePoolPinning {
    pub fn new(engine: Arc<ReplicationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PinningService for NodePoolPinning {
    fn name(&self) -> &str {
        "node-pool"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        self.engine
            .ensure_replication(cid, self.engine.min_replicas())
            .await
            .map(|_| ())
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        self.engine.remove(cid).await.map(|_| ())
    }
}

/// Pinata remote pinning
pub struct PinataPinning {
    api_url: String,
    api_key: Option<String>,
    secret_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl PinataPinning {
    pub fn new(config: &PinningConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            api_url: config.pinata_api_url.trim_end_matches('/').to_string(),
            api_key: config.pinata_api_key.clone(),
            secret_key: config.pinata_secret_key.clone(),
            client,
            timeout,
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (&self.api_key, &self.secret_key) {
            (Some(key), Some(secret)) => Ok((key.as_str(), secret.as_str())),
            _ => Err(DurabilityError::Config(
                "Pinata credentials are not configured".to_string(),
            )),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<()> {
        let (key, secret) = self.credentials()?;
        let request = request
            .header("pinata_api_key", key)
            .header("pinata_secret_api_key", secret)
            .send();
        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| DurabilityError::Timeout)??;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DurabilityError::Network(format!(
                "Pinata {} returned HTTP {}: {}",
                action, status, body
            )))
        }
    }
}

#[async_trait]
impl PinningService for PinataPinning {
    fn name(&self) -> &str {
        "pinata"
    }

    fn is_available(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/pinning/pinByHash", self.api_url))
            .json(&json!({ "hashToPin": cid }));
        self.send(request, "pinByHash").await
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        let request = self
            .client
            .delete(format!("{}/pinning/unpin/{}", self.api_url, cid));
        self.send(request, "unpin").await
    }
}

/// Services currently holding a CID
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    pub cid: String,
    pub pinned_at: u64,
    pub services: Vec<String>,
}

/// Per-service failure
#[derive(Debug, Clone, Serialize)]
pub struct ServiceFailure {
    pub service: String,
    pub error: String,
}

/// Aggregated result of a pin or unpin request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinOutcome {
    pub cid: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<ServiceFailure>,
}

/// Registered pinning services plus pin tracking
pub struct PinningRegistry {
    services: Vec<Arc<dyn PinningService>>,
    records: DashMap<String, PinRecord>,
}

impl PinningRegistry {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            records: DashMap::new(),
        }
    }

    /// Add a service; unavailable services are skipped with a warning
    pub fn register(&mut self, service: Arc<dyn PinningService>) {
        if service.is_available() {
            info!("Registered pinning service {}", service.name());
            self.services.push(service);
        } else {
            warn!("Pinning service {} is not configured, skipping", service.name());
        }
    }

    /// Names of registered services
    pub fn services(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    async fn fan_out(&self, cid: &str, pin: bool) -> PinOutcome {
        let results = join_all(self.services.iter().map(|service| async move {
            let result = if pin {
                service.pin(cid).await
            } else {
                service.unpin(cid).await
            };
            (service.name().to_string(), result)
        }))
        .await;

        let mut outcome = PinOutcome {
            cid: cid.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (service, result) in results {
            match result {
                Ok(()) => outcome.succeeded.push(service),
                Err(e) => {
                    warn!("{} via {} failed: {}", if pin { "Pin" } else { "Unpin" }, service, e);
                    outcome.failed.push(ServiceFailure {
                        service,
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Pin on every service. Fails only if no service succeeded.
    pub async fn pin(&self, cid: &str) -> Result<PinOutcome> {
        let outcome = self.fan_out(cid, true).await;
        if outcome.succeeded.is_empty() {
            return Err(DurabilityError::Unavailable(format!(
                "No pinning service accepted {}",
                cid
            )));
        }

        self.records.insert(
            cid.to_string(),
            PinRecord {
                cid: cid.to_string(),
                pinned_at: now_millis(),
                services: outcome.succeeded.clone(),
            },
        );
        Ok(outcome)
    }

    /// Unpin from every service and drop the record
    pub async fn unpin(&self, cid: &str) -> Result<PinOutcome> {
        let outcome = self.fan_out(cid, false).await;
        if outcome.succeeded.is_empty() && !outcome.failed.is_empty() {
            return Err(DurabilityError::Unavailable(format!(
                "No pinning service released {}",
                cid
            )));
        }
        self.records.remove(cid);
        Ok(outcome)
    }

    /// Pin record for a CID
    pub fn record(&self, cid: &str) -> Option<PinRecord> {
        self.records.get(cid).map(|r| r.value().clone())
    }
}

impl Default for PinningRegistry {
    fn default() -> Self {
        Self::new()
    }
}
