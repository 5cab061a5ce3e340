// Durability Node
//
// A content-durability layer over a fleet of IPFS-style storage nodes. It keeps
// content available by tracking node health, placing and repairing replicas,
// routing reads through the best public or private gateway, and archiving
// content into Filecoin-style storage deals.
//
// # Architecture
//
// * **Node Health Monitor**: probes every storage node and ranks them for reads and writes
// * **Gateway Router**: scores HTTP gateways and fetches through a fallback chain
// * **Replication Engine**: places new content and tops replicas back up
// * **Content Availability Registry**: tracks replica counts and queues repairs by priority
// * **Archival Manager**: schedules, submits and polls archival deals
// * **Chunked Ingest Assembler**: receives large uploads as numbered chunks
//
// # Usage
//
// ```rust,no_run
// use durability_node::api::ApiServer;
// use durability_node::config::Config;
// use durability_node::runtime::DurabilityServices;
// use durability_node::tasks::TaskScheduler;
// use std::sync::Arc;
//
// async fn example() -> Result<(), Box<dyn std::error::Error>> {
//     let config = Config::load("config.toml")?;
//     let services = Arc::new(DurabilityServices::from_config(&config).await?);
//
//     let scheduler = Arc::new(TaskScheduler::new());
//     services.register_background_tasks(&scheduler);
//     scheduler.start().await?;
//
//     ApiServer::new(services, scheduler).start().await?;
//     Ok(())
// }
// ```

/// HTTP API for the durability node.
///
/// Content ingest, object reads, pins, gateways, archival deals and health,
/// served with axum.
pub mod api;

/// Filecoin-style archival deals.
///
/// # Features
///
/// * Deal scheduling for content held in hot storage
/// * Lotus JSON-RPC and simulated deal clients
/// * SQLite deal ledger that survives restarts
/// * Retrieval back into hot storage
pub mod archive;

/// Content availability tracking and the prioritized replication queue.
pub mod availability;

/// Configuration loading and validation.
pub mod config;

/// Error types for the durability node.
pub mod error;

/// Broadcast bus for state-change events.
pub mod events;

/// Gateway pool statistics, selection strategies and fallback fetches.
pub mod gateway;

/// Chunked uploads and content encryption.
pub mod ingest;

/// Storage node clients and the health monitor.
///
/// # Features
///
/// * Kubo HTTP RPC client and an in-process memory node
/// * Periodic probes with a consecutive-failure threshold
/// * Ranking by priority and latency for reads and writes
pub mod node;

/// Pinning services and pin tracking.
pub mod pinning;

/// Replica placement, availability checks and repair.
pub mod replication;

/// Service wiring and background task registration.
pub mod runtime;

/// Recurring background tasks with overlap protection.
pub mod tasks;

/// Common types used across components.
pub mod types;

pub use error::{DurabilityError, Result};
