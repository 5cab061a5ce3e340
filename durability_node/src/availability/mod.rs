// Content availability registry
//
// Tracks every CID we are responsible for, periodically re-checks how many
// nodes hold it, and queues repairs for anything below its replica target.
// A separate worker drains the queue a few jobs at a time.

pub mod queue;

pub use queue::{FailureOutcome, JobStatus, ReplicationJob, ReplicationQueue};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AvailabilityConfig;
use crate::error::{DurabilityError, Result};
use crate::events::{DurabilityEvent, EventBus};
use crate::replication::{AvailabilitySnapshot, ReplicationEngine};
use crate::types::{now_millis, ContentPriority, NodeId};

/// Consecutive failed checks after which a record counts as critical
const CRITICAL_FAILURES: u32 = 3;

/// A tracked CID
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub cid: String,
    pub uploaded_at: u64,
    pub last_checked_at: Option<u64>,
    pub current_replicas: usize,
    pub target_replicas: usize,
    pub available_node_ids: BTreeSet<NodeId>,
    pub priority: ContentPriority,
    pub content_type: String,
    pub size_bytes: u64,
    pub check_count: u64,
    pub consecutive_failures: u32,
}

impl ContentRecord {
    pub fn is_under_replicated(&self) -> bool {
        self.current_replicas < self.target_replicas
    }

    pub fn is_critical(&self) -> bool {
        self.current_replicas == 0 || self.consecutive_failures > CRITICAL_FAILURES
    }

    fn apply(&mut self, check: &Result<AvailabilitySnapshot>) {
        self.last_checked_at = Some(now_millis());
        self.check_count += 1;
        match check {
            Ok(snapshot) => {
                self.available_node_ids = snapshot.available_node_ids.iter().cloned().collect();
                self.current_replicas = self.available_node_ids.len();
                self.consecutive_failures = 0;
            }
            Err(_) => self.consecutive_failures += 1,
        }
    }
}

/// Options for registering a CID
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterOptions {
    /// Replica target; the configured default when absent
    pub target_replicas: Option<usize>,
    pub priority: ContentPriority,
    /// MIME type; "unknown" when absent
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

/// Result of one availability scan
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAvailabilityReport {
    pub total_content: usize,
    pub under_replicated: usize,
    pub over_replicated: usize,
    /// Records exactly at target
    pub healthy: usize,
    pub critical: usize,
    pub average_replication_factor: f64,
    pub last_scan_time: u64,
    pub failed_checks: usize,
    pub scan_duration_ms: u64,
}

/// Registry counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    pub total_tracked: usize,
    pub replication_queue: usize,
    pub last_scan_time: Option<u64>,
    pub average_replication_factor: f64,
}

/// Result of one queue drain
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub abandoned: usize,
    /// Jobs dropped because their record was removed
    pub dropped: usize,
}

/// Content availability registry
pub struct ContentAvailabilityRegistry {
    /// Tracked content
    records: DashMap<String, ContentRecord>,

    /// Pending repairs
    queue: Mutex<ReplicationQueue>,

    /// Last published scan report
    latest_report: RwLock<Option<FleetAvailabilityReport>>,

    engine: Arc<ReplicationEngine>,
    config: AvailabilityConfig,
    events: EventBus,
}

impl ContentAvailabilityRegistry {
    pub fn new(engine: Arc<ReplicationEngine>, config: AvailabilityConfig, events: EventBus) -> Self {
        Self {
            records: DashMap::new(),
            queue: Mutex::new(ReplicationQueue::new()),
            latest_report: RwLock::new(None),
            engine,
            config,
            events,
        }
    }

    /// Start tracking a CID. A failed initial check is recorded, not returned.
    pub async fn register(&self, cid: &str, options: RegisterOptions) -> Result<ContentRecord> {
        let check = self.engine.check_availability(cid).await;
        if let Err(e) = &check {
            warn!("Initial availability check of {} failed: {}", cid, e);
        }

        let target_replicas = options
            .target_replicas
            .unwrap_or(self.config.default_target_replicas)
            .max(1);
        let content_type = options
            .content_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let record = {
            let mut entry = self
                .records
                .entry(cid.to_string())
                .or_insert_with(|| ContentRecord {
                    cid: cid.to_string(),
                    uploaded_at: now_millis(),
                    last_checked_at: None,
                    current_replicas: 0,
                    target_replicas,
                    available_node_ids: BTreeSet::new(),
                    priority: options.priority,
                    content_type: content_type.clone(),
                    size_bytes: options.size_bytes,
                    check_count: 0,
                    consecutive_failures: 0,
                });
            entry.target_replicas = target_replicas;
            entry.priority = options.priority;
            entry.content_type = content_type;
            entry.size_bytes = options.size_bytes;
            entry.apply(&check);
            entry.clone()
        };

        if record.is_under_replicated() {
            self.enqueue(&record);
        }

        info!(
            "Tracking {} ({} of {} replicas, {} priority)",
            cid, record.current_replicas, record.target_replicas, record.priority
        );
        self.events.emit(DurabilityEvent::ContentRegistered {
            cid: cid.to_string(),
            priority: record.priority,
            replicas: record.current_replicas,
        });
        Ok(record)
    }

    fn enqueue(&self, record: &ContentRecord) -> bool {
        let added = self
            .queue
            .lock()
            .enqueue(&record.cid, record.priority.weight());
        if added {
            debug!(
                "Queued replication for {} ({}/{})",
                record.cid, record.current_replicas, record.target_replicas
            );
        }
        added
    }

    /// Re-check one tracked CID now
    pub async fn check_content(&self, cid: &str) -> Result<ContentRecord> {
        if !self.records.contains_key(cid) {
            return Err(DurabilityError::NotFound(format!("{} is not tracked", cid)));
        }

        let check = self.engine.check_availability(cid).await;
        let record = self
            .update(cid, &check)
            .ok_or_else(|| DurabilityError::NotFound(format!("{} is not tracked", cid)))?;
        if record.is_under_replicated() {
            self.enqueue(&record);
        }
        Ok(record)
    }

    fn update(&self, cid: &str, check: &Result<AvailabilitySnapshot>) -> Option<ContentRecord> {
        let mut record = self.records.get_mut(cid)?;
        record.apply(check);
        Some(record.clone())
    }

    /// Check every tracked CID, queue repairs, and publish the report
    pub async fn scan(&self) -> FleetAvailabilityReport {
        let started = Instant::now();
        let cids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        info!("Scanning availability of {} CIDs", cids.len());

        let checks = join_all(cids.iter().map(|cid| async move {
            (cid, self.engine.check_availability(cid).await)
        }))
        .await;

        let mut failed_checks = 0;
        for (cid, check) in &checks {
            if let Err(e) = check {
                debug!("Availability check of {} failed: {}", cid, e);
                failed_checks += 1;
            }
            self.update(cid, check);
        }

        let records: Vec<ContentRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        let mut report = FleetAvailabilityReport {
            total_content: records.len(),
            failed_checks,
            ..FleetAvailabilityReport::default()
        };
        let mut queued = 0;
        for record in &records {
            if record.is_under_replicated() {
                report.under_replicated += 1;
                if self.enqueue(record) {
                    queued += 1;
                }
            } else if record.current_replicas > record.target_replicas {
                report.over_replicated += 1;
            } else {
                report.healthy += 1;
            }
            if record.is_critical() {
                report.critical += 1;
            }
        }
        report.average_replication_factor = average_replicas(&records);
        report.last_scan_time = now_millis();
        report.scan_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Availability scan: {} tracked, {} under-replicated ({} newly queued), {} critical",
            report.total_content, report.under_replicated, queued, report.critical
        );
        *self.latest_report.write() = Some(report.clone());
        self.events.emit(DurabilityEvent::AvailabilityScanComplete {
            report: report.clone(),
        });
        report
    }

    /// Run up to `jobs_per_tick` queued repairs
    pub async fn process_replication_queue(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();

        for _ in 0..self.config.jobs_per_tick {
            let Some(job) = self.queue.lock().next_pending() else {
                break;
            };
            summary.processed += 1;

            let Some(target) = self.records.get(&job.cid).map(|r| r.target_replicas) else {
                debug!("Dropping replication job for untracked {}", job.cid);
                self.queue.lock().remove(&job.cid);
                summary.dropped += 1;
                continue;
            };

            debug!("Replicating {} (attempt {})", job.cid, job.attempts);
            match self.engine.ensure_replication(&job.cid, target).await {
                Ok(snapshot) => {
                    self.queue.lock().complete(&job.cid);
                    let replicas = snapshot.replication_factor;
                    self.update(&job.cid, &Ok(snapshot));
                    summary.completed += 1;
                    info!("Replication of {} complete with {} replicas", job.cid, replicas);
                    self.events.emit(DurabilityEvent::ReplicationCompleted {
                        cid: job.cid.clone(),
                        replicas,
                    });
                }
                Err(e) => {
                    let outcome = self.queue.lock().fail(&job.cid, self.config.max_attempts);
                    match outcome {
                        Some(FailureOutcome::Retry { attempts }) => {
                            warn!(
                                "Replication of {} failed (attempt {}/{}): {}",
                                job.cid, attempts, self.config.max_attempts, e
                            );
                            summary.retried += 1;
                        }
                        Some(FailureOutcome::Terminal(failed)) => {
                            error!(
                                "Giving up on replication of {} after {} attempts: {}",
                                failed.cid, failed.attempts, e
                            );
                            summary.abandoned += 1;
                            self.events.emit(DurabilityEvent::ReplicationFailed {
                                cid: failed.cid,
                                attempts: failed.attempts,
                                error: e.to_string(),
                            });
                        }
                        None => {}
                    }
                }
            }
        }

        summary
    }

    /// Records below their replica target
    pub fn get_under_replicated(&self) -> Vec<ContentRecord> {
        self.collect(|r| r.is_under_replicated())
    }

    /// Records with no replica or repeated failed checks
    pub fn get_critical(&self) -> Vec<ContentRecord> {
        self.collect(|r| r.is_critical())
    }

    pub fn get_by_priority(&self, priority: ContentPriority) -> Vec<ContentRecord> {
        self.collect(|r| r.priority == priority)
    }

    fn collect(&self, predicate: impl Fn(&ContentRecord) -> bool) -> Vec<ContentRecord> {
        let mut records: Vec<ContentRecord> = self
            .records
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.cid.cmp(&b.cid));
        records
    }

    /// Record for a CID
    pub fn record(&self, cid: &str) -> Option<ContentRecord> {
        self.records.get(cid).map(|r| r.value().clone())
    }

    pub fn latest_report(&self) -> Option<FleetAvailabilityReport> {
        self.latest_report.read().clone()
    }

    pub fn stats(&self) -> ContentStats {
        let records: Vec<ContentRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        ContentStats {
            total_tracked: records.len(),
            replication_queue: self.queue.lock().len(),
            last_scan_time: self.latest_report.read().as_ref().map(|r| r.last_scan_time),
            average_replication_factor: average_replicas(&records),
        }
    }

    /// Stop tracking a CID; any queued job is dropped
    pub fn remove(&self, cid: &str) -> bool {
        self.queue.lock().remove(cid);
        self.records.remove(cid).is_some()
    }

    /// Queued jobs in run order
    pub fn queue_snapshot(&self) -> Vec<ReplicationJob> {
        self.queue.lock().snapshot()
    }
}

fn average_replicas(records: &[ContentRecord]) -> f64 {
    if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.current_replicas as f64).sum::<f64>() / records.len() as f64
    }
}
