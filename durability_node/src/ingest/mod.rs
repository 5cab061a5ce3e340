// Chunked ingest for the durability node
//
// Large uploads arrive as numbered chunks, in any order, and are spooled to
// the temp directory. Completing an upload concatenates the chunks in index
// order, optionally encrypts the result, places it on the node pool and
// registers the CID for availability tracking. Temp chunks never outlive the
// upload; a janitor sweeps uploads that were abandoned.

pub mod crypto;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::availability::{ContentAvailabilityRegistry, RegisterOptions};
use crate::config::IngestConfig;
use crate::error::{DurabilityError, Result};
use crate::replication::ReplicationEngine;
use crate::types::{now_millis, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    InProgress,
    /// Chunks are being assembled and placed; no more chunks are accepted
    Completing,
    Completed,
    Failed,
}

/// A spooled chunk
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkLocation {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub received_at: u64,
}

/// One chunked upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub upload_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_chunks: u32,
    pub received_chunks: u32,
    pub chunks: BTreeMap<u32, ChunkLocation>,
    /// Size announced by the client
    pub total_size_bytes: u64,
    pub started_at: u64,
    pub last_activity_at: u64,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    pub finished_at: Option<u64>,
    pub cid: Option<String>,
}

/// Upload status as reported to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub filename: String,
    pub status: UploadStatus,
    pub received_chunks: u32,
    pub total_chunks: u32,
    /// received / total
    pub progress: f64,
    pub bytes_received: u64,
    pub error_message: Option<String>,
    pub cid: Option<String>,
}

impl From<&UploadJob> for UploadProgress {
    fn from(job: &UploadJob) -> Self {
        Self {
            upload_id: job.upload_id.clone(),
            filename: job.filename.clone(),
            status: job.status,
            received_chunks: job.received_chunks,
            total_chunks: job.total_chunks,
            progress: job.received_chunks as f64 / job.total_chunks.max(1) as f64,
            bytes_received: job.chunks.values().map(|c| c.size_bytes).sum(),
            error_message: job.error_message.clone(),
            cid: job.cid.clone(),
        }
    }
}

/// Result of completing an upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub upload_id: String,
    pub cid: String,
    pub size_bytes: u64,
    pub replicas: usize,
    pub placed_node_ids: Vec<NodeId>,
    pub warning: Option<String>,
    pub encrypted: bool,
}

/// Janitor pass counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    /// In-progress uploads failed for inactivity
    pub stale_uploads: usize,
    /// Finished upload entries dropped after retention
    pub removed_entries: usize,
    /// Temp files deleted that no live upload owned
    pub orphan_files: usize,
}

/// Chunked ingest assembler
pub struct IngestAssembler {
    /// Uploads by id
    jobs: DashMap<String, UploadJob>,

    engine: Arc<ReplicationEngine>,
    registry: Arc<ContentAvailabilityRegistry>,
    config: IngestConfig,

    /// Replicas requested when placing assembled content
    min_replicas: usize,
}

impl IngestAssembler {
    pub fn new(
        config: IngestConfig,
        min_replicas: usize,
        engine: Arc<ReplicationEngine>,
        registry: Arc<ContentAvailabilityRegistry>,
    ) -> Self {
        Self {
            jobs: DashMap::new(),
            engine,
            registry,
            config,
            min_replicas,
        }
    }

    /// Every write gets its own file, so a re-sent chunk never touches bytes
    /// another call may be reading
    fn chunk_path(&self, upload_id: &str, index: u32) -> PathBuf {
        self.config.temp_dir.join(format!(
            "{}_chunk_{}_{}",
            upload_id,
            index,
            Uuid::new_v4().simple()
        ))
    }

    /// Start a chunked upload; returns its id
    pub fn init_upload(
        &self,
        filename: &str,
        mime_type: &str,
        total_chunks: u32,
        total_size: u64,
    ) -> Result<String> {
        if total_chunks == 0 {
            return Err(DurabilityError::InvalidRequest(
                "totalChunks must be at least 1".to_string(),
            ));
        }

        let upload_id = Uuid::new_v4().to_string();
        let now = now_millis();
        self.jobs.insert(
            upload_id.clone(),
            UploadJob {
                upload_id: upload_id.clone(),
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
                total_chunks,
                received_chunks: 0,
                chunks: BTreeMap::new(),
                total_size_bytes: total_size,
                started_at: now,
                last_activity_at: now,
                status: UploadStatus::InProgress,
                error_message: None,
                finished_at: None,
                cid: None,
            },
        );

        info!(
            "Started upload {} for {} ({} chunks, {} bytes)",
            upload_id, filename, total_chunks, total_size
        );
        Ok(upload_id)
    }

    fn in_progress(&self, upload_id: &str) -> Result<UploadJob> {
        let job = self
            .jobs
            .get(upload_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown upload {}", upload_id)))?;
        if job.status != UploadStatus::InProgress {
            return Err(not_in_progress(upload_id));
        }
        Ok(job)
    }

    /// Move an in-progress upload to `Completing`; only one caller wins
    fn begin_completion(&self, upload_id: &str) -> Result<UploadJob> {
        let mut job = self
            .jobs
            .get_mut(upload_id)
            .ok_or_else(|| DurabilityError::NotFound(format!("Unknown upload {}", upload_id)))?;
        if job.status != UploadStatus::InProgress {
            return Err(not_in_progress(upload_id));
        }
        job.status = UploadStatus::Completing;
        job.last_activity_at = now_millis();
        Ok(job.clone())
    }

    /// Store one chunk. Re-sending an index replaces it.
    pub async fn put_chunk(&self, upload_id: &str, index: u32, data: Bytes) -> Result<UploadProgress> {
        let total_chunks = self.in_progress(upload_id)?.total_chunks;
        if index >= total_chunks {
            return Err(DurabilityError::InvalidRequest(format!(
                "Chunk index {} out of range for {} chunks",
                index, total_chunks
            )));
        }

        fs::create_dir_all(&self.config.temp_dir).await?;
        let path = self.chunk_path(upload_id, index);
        fs::write(&path, &data).await?;

        // The upload may have started completing while the chunk was written
        let accepted = match self.jobs.get_mut(upload_id) {
            Some(mut job) if job.status == UploadStatus::InProgress => {
                let now = now_millis();
                let replaced = job.chunks.insert(
                    index,
                    ChunkLocation {
                        path: path.clone(),
                        size_bytes: data.len() as u64,
                        received_at: now,
                    },
                );
                job.received_chunks = job.chunks.len() as u32;
                job.last_activity_at = now;
                debug!(
                    "Upload {} chunk {} stored ({}/{})",
                    upload_id, index, job.received_chunks, job.total_chunks
                );
                Ok((UploadProgress::from(&*job), replaced))
            }
            Some(_) => Err(not_in_progress(upload_id)),
            None => Err(DurabilityError::NotFound(format!("Unknown upload {}", upload_id))),
        };

        match accepted {
            Ok((progress, replaced)) => {
                if let Some(old) = replaced {
                    remove_quietly(&old.path).await;
                }
                Ok(progress)
            }
            Err(e) => {
                remove_quietly(&path).await;
                Err(e)
            }
        }
    }

    /// Assemble, place and register the upload
    pub async fn complete(&self, upload_id: &str, encryption_key: Option<&str>) -> Result<CompletedUpload> {
        let job = self.begin_completion(upload_id)?;

        if job.received_chunks != job.total_chunks {
            let err = DurabilityError::UploadIncomplete {
                received: job.received_chunks,
                total: job.total_chunks,
            };
            warn!("Upload {} completed early: {}", upload_id, err);
            self.cleanup(&job).await;
            self.finish(upload_id, Err(&err));
            return Err(err);
        }

        let outcome = self.assemble_and_place(&job, encryption_key).await;
        self.cleanup(&job).await;
        self.finish(upload_id, outcome.as_ref().map(|c| c.cid.clone()));

        match &outcome {
            Ok(done) => info!(
                "Upload {} stored as {} on {} nodes",
                upload_id, done.cid, done.replicas
            ),
            Err(e) => warn!("Upload {} failed: {}", upload_id, e),
        }
        outcome
    }

    async fn assemble_and_place(&self, job: &UploadJob, encryption_key: Option<&str>) -> Result<CompletedUpload> {
        let mut assembled = BytesMut::new();
        for chunk in job.chunks.values() {
            assembled.extend_from_slice(&fs::read(&chunk.path).await?);
        }

        let (payload, encrypted) = match encryption_key.filter(|k| !k.is_empty()) {
            Some(key) => (Bytes::from(crypto::encrypt(key, &assembled)?), true),
            None => (assembled.freeze(), false),
        };

        let placed = self.engine.place_initial(payload, self.min_replicas).await?;

        let options = RegisterOptions {
            content_type: Some(job.mime_type.clone()),
            size_bytes: placed.size_bytes,
            ..RegisterOptions::default()
        };
        if let Err(e) = self.registry.register(&placed.cid, options).await {
            warn!("Registering {} for availability tracking failed: {}", placed.cid, e);
        }

        Ok(CompletedUpload {
            upload_id: job.upload_id.clone(),
            replicas: placed.replicas(),
            cid: placed.cid,
            size_bytes: placed.size_bytes,
            placed_node_ids: placed.placed_node_ids,
            warning: placed.warning,
            encrypted,
        })
    }

    fn finish(&self, upload_id: &str, outcome: std::result::Result<String, &DurabilityError>) {
        if let Some(mut job) = self.jobs.get_mut(upload_id) {
            job.finished_at = Some(now_millis());
            match outcome {
                Ok(cid) => {
                    job.status = UploadStatus::Completed;
                    job.cid = Some(cid);
                }
                Err(e) => {
                    job.status = UploadStatus::Failed;
                    job.error_message = Some(e.to_string());
                }
            }
        }
    }

    /// Delete a job's temp chunks
    async fn cleanup(&self, job: &UploadJob) {
        for chunk in job.chunks.values() {
            remove_quietly(&chunk.path).await;
        }
    }

    /// Progress of an upload
    pub fn status(&self, upload_id: &str) -> Option<UploadProgress> {
        self.jobs.get(upload_id).map(|j| UploadProgress::from(j.value()))
    }

    /// Fail inactive uploads, drop old finished entries and delete orphaned temp files
    pub async fn sweep_stale(&self) -> Result<SweepSummary> {
        let now = now_millis();
        let stale_after = self.config.stale_after().as_millis() as u64;
        let retention = self.config.finished_retention().as_millis() as u64;
        let mut summary = SweepSummary::default();

        let is_stale = |job: &UploadJob| {
            job.status == UploadStatus::InProgress
                && now.saturating_sub(job.last_activity_at) >= stale_after
        };
        let candidates: Vec<String> = self
            .jobs
            .iter()
            .filter(|j| is_stale(j.value()))
            .map(|j| j.key().clone())
            .collect();
        for upload_id in candidates {
            // Fail the upload first so no chunk lands after the cleanup
            let abandoned = match self.jobs.get_mut(&upload_id) {
                Some(mut job) if is_stale(job.value()) => {
                    job.status = UploadStatus::Failed;
                    job.error_message = Some("Upload abandoned".to_string());
                    job.finished_at = Some(now);
                    Some(job.clone())
                }
                _ => None,
            };
            if let Some(job) = abandoned {
                info!("Upload {} abandoned, cleaning up", upload_id);
                self.cleanup(&job).await;
                summary.stale_uploads += 1;
            }
        }

        let before = self.jobs.len();
        self.jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.status != UploadStatus::InProgress => {
                now.saturating_sub(finished) < retention
            }
            _ => true,
        });
        summary.removed_entries = before.saturating_sub(self.jobs.len());

        summary.orphan_files = self.sweep_orphans(stale_after).await?;
        if summary.stale_uploads + summary.removed_entries + summary.orphan_files > 0 {
            info!(
                "Ingest janitor: {} stale uploads, {} entries removed, {} orphan files",
                summary.stale_uploads, summary.removed_entries, summary.orphan_files
            );
        }
        Ok(summary)
    }

    async fn sweep_orphans(&self, stale_after_ms: u64) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.config.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((upload_id, _)) = name.split_once("_chunk_") else {
                continue;
            };
            let live = self
                .jobs
                .get(upload_id)
                .map(|j| matches!(j.status, UploadStatus::InProgress | UploadStatus::Completing))
                .unwrap_or(false);
            if live {
                continue;
            }

            let age_ms = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            if age_ms >= stale_after_ms {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Removing orphan {} failed: {}", entry.path().display(), e),
                }
            }
        }
        Ok(removed)
    }
}

fn not_in_progress(upload_id: &str) -> DurabilityError {
    DurabilityError::InvalidRequest(format!("Upload {} is no longer in progress", upload_id))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Removing {} failed: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvailabilityConfig, HealthConfig, NodeConfig, ReplicationConfig};
    use crate::events::EventBus;
    use crate::node::{MemoryNodeClient, NodeHealthMonitor};
    use tempfile::TempDir;

    struct Harness {
        ingest: IngestAssembler,
        engine: Arc<ReplicationEngine>,
        nodes: Vec<Arc<MemoryNodeClient>>,
        dir: TempDir,
    }

    async fn harness(config_fn: impl FnOnce(&mut IngestConfig)) -> Harness {
        let events = EventBus::default();
        let monitor = Arc::new(NodeHealthMonitor::new(HealthConfig::default(), 0, events.clone()));
        let mut nodes = Vec::new();
        for i in 0..3 {
            let id = format!("node-{}", i);
            let client = Arc::new(MemoryNodeClient::new(&id, monitor.memory_network()));
            monitor
                .register_node_with_client(
                    NodeConfig {
                        id: id.clone(),
                        endpoint: format!("memory://{}", id),
                        region: None,
                        priority: 50,
                    },
                    client.clone(),
                )
                .await
                .unwrap();
            nodes.push(client);
        }
        monitor.probe_all().await;

        let engine = Arc::new(ReplicationEngine::new(monitor, ReplicationConfig::default()));
        let registry = Arc::new(ContentAvailabilityRegistry::new(
            engine.clone(),
            AvailabilityConfig::default(),
            events,
        ));

        let dir = tempfile::tempdir().unwrap();
        let mut config = IngestConfig {
            temp_dir: dir.path().join("temp"),
            ..IngestConfig::default()
        };
        config_fn(&mut config);

        Harness {
            ingest: IngestAssembler::new(config, 3, engine.clone(), registry),
            engine,
            nodes,
            dir,
        }
    }

    fn temp_files(h: &Harness) -> usize {
        std::fs::read_dir(h.dir.path().join("temp"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble_in_index_order() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("clip.bin", "application/octet-stream", 3, 25).unwrap();

        h.ingest.put_chunk(&id, 1, Bytes::from(vec![b'b'; 10])).await.unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from(vec![b'a'; 10])).await.unwrap();
        let progress = h.ingest.put_chunk(&id, 2, Bytes::from(vec![b'c'; 5])).await.unwrap();
        assert_eq!(progress.received_chunks, 3);
        assert_eq!(progress.bytes_received, 25);

        let done = h.ingest.complete(&id, None).await.unwrap();
        assert_eq!(done.size_bytes, 25);
        assert!(done.replicas >= 3);
        assert!(!done.encrypted);

        let stored = h.engine.read(&done.cid).await.unwrap();
        let mut expected = vec![b'a'; 10];
        expected.extend(vec![b'b'; 10]);
        expected.extend(vec![b'c'; 5]);
        assert_eq!(stored.to_vec(), expected);

        assert_eq!(temp_files(&h), 0);
        let status = h.ingest.status(&id).unwrap();
        assert_eq!(status.status, UploadStatus::Completed);
        assert_eq!(status.cid.as_deref(), Some(done.cid.as_str()));
    }

    #[tokio::test]
    async fn test_resent_chunk_is_idempotent() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("f", "text/plain", 2, 4).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"xx")).await.unwrap();
        let progress = h.ingest.put_chunk(&id, 0, Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(progress.received_chunks, 1);
        assert!((progress.progress - 0.5).abs() < 1e-9);

        h.ingest.put_chunk(&id, 1, Bytes::from_static(b"cd")).await.unwrap();
        let done = h.ingest.complete(&id, None).await.unwrap();
        assert_eq!(h.engine.read(&done.cid).await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let h = harness(|_| {}).await;
        assert!(h.ingest.init_upload("f", "text/plain", 0, 0).is_err());

        let id = h.ingest.init_upload("f", "text/plain", 2, 4).unwrap();
        assert!(matches!(
            h.ingest.put_chunk(&id, 2, Bytes::from_static(b"x")).await,
            Err(DurabilityError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.ingest.put_chunk("nope", 0, Bytes::from_static(b"x")).await,
            Err(DurabilityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_incomplete_upload_fails_and_cleans_up() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("f", "text/plain", 3, 30).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(temp_files(&h), 1);

        match h.ingest.complete(&id, None).await {
            Err(DurabilityError::UploadIncomplete { received, total }) => {
                assert_eq!((received, total), (1, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(temp_files(&h), 0);
        assert_eq!(h.ingest.status(&id).unwrap().status, UploadStatus::Failed);

        // Further chunks are refused
        assert!(h.ingest.put_chunk(&id, 1, Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_placement_failure_still_cleans_up() {
        let h = harness(|_| {}).await;
        for node in &h.nodes {
            node.set_accept_pins(false);
        }
        let id = h.ingest.init_upload("f", "text/plain", 1, 3).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"abc")).await.unwrap();

        assert!(h.ingest.complete(&id, None).await.is_err());
        assert_eq!(temp_files(&h), 0);
        let status = h.ingest.status(&id).unwrap();
        assert_eq!(status.status, UploadStatus::Failed);
        assert!(status.error_message.is_some());
    }

    #[tokio::test]
    async fn test_encrypted_upload() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("secret.txt", "text/plain", 1, 6).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"secret")).await.unwrap();

        let done = h.ingest.complete(&id, Some("passphrase")).await.unwrap();
        assert!(done.encrypted);
        let stored = h.engine.read(&done.cid).await.unwrap();
        assert_eq!(crypto::decrypt("passphrase", &stored).unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_janitor_sweeps_stale_uploads_and_orphans() {
        let h = harness(|c| {
            c.stale_after_secs = 0;
            c.finished_retention_secs = 0;
        })
        .await;
        let id = h.ingest.init_upload("f", "text/plain", 2, 4).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"ab")).await.unwrap();
        std::fs::write(h.dir.path().join("temp").join("ghost_chunk_0"), b"zz").unwrap();
        std::fs::write(h.dir.path().join("temp").join("unrelated.txt"), b"keep").unwrap();

        let summary = h.ingest.sweep_stale().await.unwrap();
        assert_eq!(summary.stale_uploads, 1);
        assert_eq!(summary.removed_entries, 1);
        assert_eq!(summary.orphan_files, 1);
        assert!(h.ingest.status(&id).is_none());
        assert_eq!(temp_files(&h), 1);
    }

    #[tokio::test]
    async fn test_completion_is_claimed_once() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("f", "text/plain", 1, 3).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"abc")).await.unwrap();
        for node in &h.nodes {
            node.set_latency(std::time::Duration::from_millis(200));
        }

        let first = h.ingest.complete(&id, None);
        let late = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert_eq!(h.ingest.status(&id).unwrap().status, UploadStatus::Completing);
            let second = h.ingest.complete(&id, None).await;
            let chunk = h.ingest.put_chunk(&id, 0, Bytes::from_static(b"xyz")).await;
            (second, chunk)
        };
        let (first, (second, chunk)) = tokio::join!(first, late);

        let done = first.unwrap();
        assert!(matches!(second, Err(DurabilityError::InvalidRequest(_))));
        assert!(matches!(chunk, Err(DurabilityError::InvalidRequest(_))));

        assert_eq!(h.engine.read(&done.cid).await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(temp_files(&h), 0);
        let status = h.ingest.status(&id).unwrap();
        assert_eq!(status.status, UploadStatus::Completed);
        assert_eq!(status.cid.as_deref(), Some(done.cid.as_str()));
    }

    #[tokio::test]
    async fn test_janitor_survives_undeletable_orphan() {
        let h = harness(|c| c.stale_after_secs = 0).await;
        let temp = h.dir.path().join("temp");
        std::fs::create_dir_all(temp.join("stuck_chunk_0")).unwrap();
        std::fs::write(temp.join("ghost_chunk_0"), b"zz").unwrap();

        let summary = h.ingest.sweep_stale().await.unwrap();
        assert_eq!(summary.orphan_files, 1);
        assert!(!temp.join("ghost_chunk_0").exists());
    }

    #[tokio::test]
    async fn test_janitor_keeps_active_uploads() {
        let h = harness(|_| {}).await;
        let id = h.ingest.init_upload("f", "text/plain", 2, 4).unwrap();
        h.ingest.put_chunk(&id, 0, Bytes::from_static(b"ab")).await.unwrap();

        let summary = h.ingest.sweep_stale().await.unwrap();
        assert_eq!(summary.stale_uploads, 0);
        assert_eq!(h.ingest.status(&id).unwrap().status, UploadStatus::InProgress);
        assert_eq!(temp_files(&h), 1);
    }
}
