// API handlers for content, objects and health
//
// Content routes drive the chunked ingest assembler. Object routes read
// through the gateway router with the node pool as the last resort, and
// manage pins, replication and JSON metadata objects.

use crate::api::AppState;
use crate::availability::RegisterOptions;
use crate::error::{DurabilityError, Result};
use crate::gateway::{FetchOptions, SelectOptions};
use crate::ingest::{crypto, CompletedUpload};
use crate::runtime::DurabilityServices;
use crate::types::now_millis;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_REPLICATION_FACTOR: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    pub total_chunks: u32,
    #[serde(default)]
    pub total_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub index: Option<u32>,
}

/// JSON form of a chunk
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpload {
    pub chunk_index: u32,
    /// Base64 chunk bytes
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompleteRequest {
    pub encryption_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    #[serde(flatten)]
    pub upload: CompletedUpload,
    pub gateway_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadQuery {
    pub decrypt: Option<bool>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub cid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateRequest {
    pub replication_factor: usize,
}

/// Start a chunked upload
#[axum::debug_handler]
pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitUploadRequest>,
) -> Result<impl IntoResponse> {
    if request.filename.is_empty() {
        return Err(DurabilityError::InvalidRequest(
            "filename is required".to_string(),
        ));
    }

    let mime_type = if request.mime_type.is_empty() {
        "application/octet-stream"
    } else {
        request.mime_type.as_str()
    };
    let upload_id = state.services.ingest.init_upload(
        &request.filename,
        mime_type,
        request.total_chunks,
        request.total_size,
    )?;

    Ok(Json(json!({ "uploadId": upload_id })))
}

/// Receive one chunk, as raw bytes with `?index=N` or as JSON with base64 data
#[axum::debug_handler]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    let (index, data) = if is_json {
        let chunk: ChunkUpload = serde_json::from_slice(&body)?;
        let data = STANDARD
            .decode(chunk.data.as_bytes())
            .map_err(|e| DurabilityError::InvalidRequest(format!("Invalid base64 chunk: {}", e)))?;
        (chunk.chunk_index, Bytes::from(data))
    } else {
        let index = query.index.ok_or_else(|| {
            DurabilityError::InvalidRequest("Chunk index is required".to_string())
        })?;
        (index, body)
    };

    let progress = state.services.ingest.put_chunk(&upload_id, index, data).await?;
    Ok(Json(progress))
}

/// Assemble and place a finished upload
#[axum::debug_handler]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    request: Option<Json<CompleteRequest>>,
) -> Result<impl IntoResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let services = &state.services;

    let upload = services
        .ingest
        .complete(&upload_id, request.encryption_key.as_deref())
        .await?;

    let gateway_url = services
        .gateways
        .select_with(&upload.cid, &SelectOptions::default())
        .await
        .ok()
        .map(|gateway| format!("{}{}", gateway, upload.cid));

    Ok(Json(CompleteResponse { upload, gateway_url }))
}

/// Upload progress for an upload id, otherwise the tracking record for a CID
#[axum::debug_handler]
pub async fn content_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if let Some(progress) = state.services.ingest.status(&id) {
        return Ok(Json(serde_json::to_value(progress)?));
    }
    if let Some(record) = state.services.registry.record(&id) {
        return Ok(Json(serde_json::to_value(record)?));
    }
    Err(DurabilityError::NotFound(format!("No upload or content {}", id)))
}

/// Gateways first, then any node that serves the CID. When both fail the
/// caller still learns which gateways were tried.
async fn read_object(services: &DurabilityServices, cid: &str) -> Result<Bytes> {
    let gateway_err = match services.gateways.fetch(cid, &FetchOptions::default()).await {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };
    debug!("Gateway fetch of {} failed, reading from nodes: {}", cid, gateway_err);

    match services.engine.read(cid).await {
        Ok(bytes) => Ok(bytes),
        Err(node_err) => {
            debug!("Node read of {} failed: {}", cid, node_err);
            let attempted = match &gateway_err {
                DurabilityError::NoHealthyGateways { attempted } => attempted.clone(),
                _ => return Err(gateway_err),
            };
            match node_err {
                // Nobody holds it: a plain miss, with the gateways named
                DurabilityError::NotFound(_) => Err(DurabilityError::NotFound(format!(
                    "{} is not held by any node or gateway (gateways tried: {})",
                    cid,
                    attempted.join(", ")
                ))),
                _ => Err(gateway_err),
            }
        }
    }
}

/// Object bytes, optionally decrypted
#[axum::debug_handler]
pub async fn get_content(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<impl IntoResponse> {
    let services = &state.services;
    let mut data = read_object(services, &cid).await?;

    if query.decrypt.unwrap_or(false) {
        let key = query
            .encryption_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DurabilityError::InvalidRequest("encryptionKey is required to decrypt".to_string())
            })?;
        data = Bytes::from(crypto::decrypt(&key, &data)?);
    }

    let content_type = services
        .registry
        .record(&cid)
        .map(|r| r.content_type)
        .filter(|t| t != "unknown")
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

/// Pin on every pinning service and start tracking the CID
#[axum::debug_handler]
pub async fn pin_content(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PinRequest>,
) -> Result<impl IntoResponse> {
    if request.cid.is_empty() {
        return Err(DurabilityError::InvalidRequest("cid is required".to_string()));
    }
    let services = &state.services;

    let outcome = services.pinning.pin(&request.cid).await?;
    if services.registry.record(&request.cid).is_none() {
        if let Err(e) = services
            .registry
            .register(&request.cid, RegisterOptions::default())
            .await
        {
            warn!("Tracking pinned {} failed: {}", request.cid, e);
        }
    }

    info!("Pinned {} on {:?}", request.cid, outcome.succeeded);
    Ok(Json(outcome))
}

/// Unpin everywhere and stop tracking
#[axum::debug_handler]
pub async fn unpin_content(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse> {
    let outcome = state.services.pinning.unpin(&cid).await?;
    state.services.registry.remove(&cid);
    Ok(Json(outcome))
}

/// Live availability plus pin and tracking records
#[axum::debug_handler]
pub async fn ipfs_status(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse> {
    let services = &state.services;
    let availability = services.engine.check_availability(&cid).await?;

    Ok(Json(json!({
        "cid": cid,
        "availability": availability,
        "pin": services.pinning.record(&cid),
        "tracking": services.registry.record(&cid),
    })))
}

/// Top a CID up to the requested replication factor
#[axum::debug_handler]
pub async fn replicate_content(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    Json(request): Json<ReplicateRequest>,
) -> Result<impl IntoResponse> {
    if !(1..=MAX_REPLICATION_FACTOR).contains(&request.replication_factor) {
        return Err(DurabilityError::InvalidRequest(format!(
            "replicationFactor must be between 1 and {}",
            MAX_REPLICATION_FACTOR
        )));
    }

    let snapshot = state
        .services
        .engine
        .ensure_replication(&cid, request.replication_factor)
        .await?;
    Ok(Json(snapshot))
}

/// Store a JSON object on the node pool
#[axum::debug_handler]
pub async fn store_metadata(
    State(state): State<Arc<AppState>>,
    Json(metadata): Json<serde_json::Value>,
) -> Result<impl IntoResponse> {
    if !metadata.is_object() {
        return Err(DurabilityError::InvalidRequest(
            "Metadata must be a JSON object".to_string(),
        ));
    }
    let services = &state.services;

    let payload = Bytes::from(serde_json::to_vec(&metadata)?);
    let placed = services
        .engine
        .place_initial(payload, services.engine.min_replicas())
        .await?;

    let options = RegisterOptions {
        content_type: Some("application/json".to_string()),
        size_bytes: placed.size_bytes,
        ..RegisterOptions::default()
    };
    if let Err(e) = services.registry.register(&placed.cid, options).await {
        warn!("Tracking metadata {} failed: {}", placed.cid, e);
    }

    Ok(Json(json!({
        "cid": placed.cid,
        "sizeBytes": placed.size_bytes,
        "replicas": placed.replicas(),
        "warning": placed.warning,
    })))
}

/// Fetch a stored JSON object
#[axum::debug_handler]
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse> {
    let data = read_object(&state.services, &cid).await?;
    let metadata: serde_json::Value = serde_json::from_slice(&data)
        .map_err(|e| DurabilityError::Serialization(format!("{} is not JSON metadata: {}", cid, e)))?;
    Ok(Json(metadata))
}

fn uptime_secs(services: &DurabilityServices) -> u64 {
    now_millis().saturating_sub(services.started_at) / 1000
}

/// Health check
#[axum::debug_handler]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let services = &state.services;
    let healthy = services.monitor.healthy_count().await;
    let total = services.monitor.nodes().await.len();

    Ok(Json(json!({
        "status": if healthy > 0 { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs(services),
        "nodes": { "total": total, "healthy": healthy },
        "content": services.registry.stats(),
        "deals": services.archival.summary(),
    })))
}

/// Health check with per-node, per-gateway, report and task detail
#[axum::debug_handler]
pub async fn detailed_health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let services = &state.services;
    let fleet = services.monitor.summary().await;

    Ok(Json(json!({
        "status": if fleet.healthy_nodes > 0 { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs(services),
        "nodes": fleet,
        "gateways": services.gateways.stats(),
        "content": services.registry.stats(),
        "latestReport": services.registry.latest_report(),
        "replicationQueue": services.registry.queue_snapshot(),
        "deals": services.archival.summary(),
        "pinningServices": services.pinning.services(),
        "tasks": state.scheduler.stats(),
    })))
}
