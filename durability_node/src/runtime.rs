// Service wiring for the durability node
//
// Builds every component from the loaded configuration and registers the
// background loops on the task scheduler.

use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::{ArchivalClient, ArchivalManager, LotusArchivalClient, SimulatedArchivalClient};
use crate::availability::ContentAvailabilityRegistry;
use crate::config::{ArchivalBackend, Config};
use crate::error::Result;
use crate::events::EventBus;
use crate::gateway::{GatewayRouter, HttpGatewayTransport};
use crate::ingest::IngestAssembler;
use crate::node::NodeHealthMonitor;
use crate::pinning::{NodePoolPinning, PinataPinning, PinningRegistry};
use crate::replication::ReplicationEngine;
use crate::tasks::TaskScheduler;
use crate::types::now_millis;

/// Every long-lived component of a running node
pub struct DurabilityServices {
    pub config: Config,
    pub events: EventBus,
    pub monitor: Arc<NodeHealthMonitor>,
    pub gateways: Arc<GatewayRouter>,
    pub engine: Arc<ReplicationEngine>,
    pub registry: Arc<ContentAvailabilityRegistry>,
    pub pinning: Arc<PinningRegistry>,
    pub archival: Arc<ArchivalManager>,
    pub ingest: Arc<IngestAssembler>,
    pub started_at: u64,
}

impl DurabilityServices {
    /// Build the services described by `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let events = EventBus::default();
        let gateways = GatewayRouter::new(
            config.gateways.clone(),
            Arc::new(HttpGatewayTransport::new(config.gateways.request_timeout())),
            events.clone(),
        );
        let client: Arc<dyn ArchivalClient> = match config.archival.backend {
            ArchivalBackend::Simulated => Arc::new(SimulatedArchivalClient::persistent(
                config.archival.data_dir.join("simulated"),
            )),
            ArchivalBackend::Lotus => Arc::new(LotusArchivalClient::new(&config.archival)),
        };
        Self::assemble(config, events, Arc::new(gateways), client).await
    }

    /// Build the services around a provided gateway router and archival client
    pub async fn assemble(
        config: &Config,
        events: EventBus,
        gateways: Arc<GatewayRouter>,
        archival_client: Arc<dyn ArchivalClient>,
    ) -> Result<Self> {
        let monitor = Arc::new(NodeHealthMonitor::new(
            config.health.clone(),
            config.replication.write_priority_threshold,
            events.clone(),
        ));
        for node in &config.nodes {
            monitor.register_node(node.clone()).await?;
        }
        if config.nodes.is_empty() {
            warn!("No storage nodes configured; uploads will fail until nodes are added");
        }

        let engine = Arc::new(ReplicationEngine::new(
            monitor.clone(),
            config.replication.clone(),
        ));
        let registry = Arc::new(ContentAvailabilityRegistry::new(
            engine.clone(),
            config.availability.clone(),
            events.clone(),
        ));

        let mut pinning = PinningRegistry::new();
        pinning.register(Arc::new(NodePoolPinning::new(engine.clone())));
        pinning.register(Arc::new(PinataPinning::new(&config.pinning)));

        let archival = Arc::new(
            ArchivalManager::new(
                config.archival.clone(),
                archival_client,
                engine.clone(),
                events.clone(),
            )
            .await?,
        );
        archival.load().await?;

        let ingest = Arc::new(IngestAssembler::new(
            config.ingest.clone(),
            config.replication.min_replicas,
            engine.clone(),
            registry.clone(),
        ));

        info!(
            "Durability services ready: {} nodes, {} pinning services",
            config.nodes.len(),
            pinning.services().len()
        );

        Ok(Self {
            config: config.clone(),
            events,
            monitor,
            gateways,
            engine,
            registry,
            pinning: Arc::new(pinning),
            archival,
            ingest,
            started_at: now_millis(),
        })
    }

    /// Register every background loop on `scheduler`
    pub fn register_background_tasks(&self, scheduler: &TaskScheduler) {
        let monitor = self.monitor.clone();
        scheduler.register_recurring(
            "node-health",
            self.config.health.probe_interval(),
            true,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.probe_all().await;
                    Ok(())
                }
            },
        );

        let gateways = self.gateways.clone();
        scheduler.register_recurring(
            "gateway-probe",
            self.config.gateways.probe_interval(),
            false,
            move || {
                let gateways = gateways.clone();
                async move {
                    gateways.probe_all().await;
                    Ok(())
                }
            },
        );

        let registry = self.registry.clone();
        scheduler.register_recurring(
            "availability-scan",
            self.config.availability.scan_interval(),
            false,
            move || {
                let registry = registry.clone();
                async move {
                    registry.scan().await;
                    Ok(())
                }
            },
        );

        let registry = self.registry.clone();
        scheduler.register_recurring(
            "replication-drain",
            self.config.availability.replication_interval(),
            false,
            move || {
                let registry = registry.clone();
                async move {
                    registry.process_replication_queue().await;
                    Ok(())
                }
            },
        );

        let archival = self.archival.clone();
        scheduler.register_recurring(
            "deal-scheduler",
            self.config.archival.scheduler_interval(),
            true,
            move || {
                let archival = archival.clone();
                async move { archival.process_scheduled_deals().await.map(|_| ()) }
            },
        );

        let archival = self.archival.clone();
        scheduler.register_recurring(
            "deal-poller",
            self.config.archival.poller_interval(),
            false,
            move || {
                let archival = archival.clone();
                async move { archival.check_pending_deals().await.map(|_| ()) }
            },
        );

        let ingest = self.ingest.clone();
        scheduler.register_recurring(
            "ingest-janitor",
            self.config.ingest.janitor_interval(),
            false,
            move || {
                let ingest = ingest.clone();
                async move { ingest.sweep_stale().await.map(|_| ()) }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DealStatus;
    use crate::config::NodeConfig;
    use bytes::Bytes;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.nodes = (0..3)
            .map(|i| NodeConfig {
                id: format!("node-{}", i),
                endpoint: format!("memory://node-{}", i),
                region: None,
                priority: 50,
            })
            .collect();
        config.archival.data_dir = dir.join("archive");
        config.ingest.temp_dir = dir.join("temp");
        config
    }

    #[tokio::test]
    async fn test_services_from_memory_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let services = DurabilityServices::from_config(&config).await.unwrap();

        services.monitor.probe_all().await;
        assert_eq!(services.monitor.healthy_count().await, 3);
        assert_eq!(services.pinning.services(), vec!["node-pool".to_string()]);

        let scheduler = TaskScheduler::new();
        services.register_background_tasks(&scheduler);
        let names: Vec<String> = scheduler.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"deal-scheduler".to_string()));
        assert!(names.contains(&"ingest-janitor".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_node_ids_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let duplicate = config.nodes[0].clone();
        config.nodes.push(duplicate);
        assert!(DurabilityServices::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_deals_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let first = DurabilityServices::from_config(&config).await.unwrap();
        first.monitor.probe_all().await;
        let placed = first
            .engine
            .place_initial(Bytes::from_static(b"archive me"), 3)
            .await
            .unwrap();
        first
            .archival
            .archive("c1", &placed.cid, placed.size_bytes)
            .await
            .unwrap();
        first.archival.process_scheduled_deals().await.unwrap();
        drop(first);

        let second = DurabilityServices::from_config(&config).await.unwrap();
        assert_eq!(second.archival.deal(&placed.cid).unwrap().status, DealStatus::Pending);
        let run = second.archival.check_pending_deals().await.unwrap();
        assert_eq!(run.failed, 0);
        assert!(second.archival.is_archived(&placed.cid));
    }
}
