// Durability event bus
//
// Components publish lifecycle events here; operators and alerting hooks
// subscribe. Publishing never blocks and never fails when nobody listens.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::archive::DealStatus;
use crate::availability::FleetAvailabilityReport;
use crate::types::ContentPriority;

/// Events emitted by the durability components
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DurabilityEvent {
    /// A CID started being tracked by the availability registry
    ContentRegistered {
        cid: String,
        priority: ContentPriority,
        replicas: usize,
    },
    /// An availability scan finished and its report was published
    AvailabilityScanComplete { report: FleetAvailabilityReport },
    /// A queued replication job reached its target
    ReplicationCompleted { cid: String, replicas: usize },
    /// A queued replication job exhausted its attempts and was dropped
    ReplicationFailed {
        cid: String,
        attempts: u32,
        error: String,
    },
    /// A storage node crossed the health threshold in either direction
    NodeHealthChanged { node_id: String, healthy: bool },
    /// A gateway crossed the availability threshold in either direction
    GatewayAvailabilityChanged { url: String, available: bool },
    /// An archival deal changed status
    DealStatusChanged { cid: String, status: DealStatus },
}

/// Broadcast bus shared by all components
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DurabilityEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DurabilityEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn emit(&self, event: DurabilityEvent) {
        trace!("Emitting event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
