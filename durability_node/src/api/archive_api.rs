// Archival deal API
//
// Schedules deals for content held in hot storage, reports deal state and
// triggers the deal workers and retrievals on demand.

use crate::api::AppState;
use crate::archive::HotStorage;
use crate::error::{DurabilityError, Result};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    #[serde(default)]
    pub content_id: String,
    #[serde(default)]
    pub cid: String,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub cid: String,
}

/// Schedule an archival deal for content that is in hot storage
#[axum::debug_handler]
pub async fn archive_content(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ArchiveRequest>,
) -> Result<impl IntoResponse> {
    if request.content_id.is_empty() || request.cid.is_empty() {
        return Err(DurabilityError::InvalidRequest(
            "contentId and cid are required".to_string(),
        ));
    }
    let services = &state.services;

    if !services.engine.is_present(&request.cid).await.unwrap_or(false) {
        return Err(DurabilityError::NotFound(format!(
            "{} is not in hot storage",
            request.cid
        )));
    }

    let size = request
        .size
        .or_else(|| services.registry.record(&request.cid).map(|r| r.size_bytes))
        .unwrap_or(0);
    let scheduled = services
        .archival
        .archive(&request.content_id, &request.cid, size)
        .await?;

    info!("Archival requested for {} ({})", request.cid, request.content_id);
    Ok(Json(json!({
        "cid": request.cid,
        "scheduled": scheduled,
        "deal": services.archival.deal(&request.cid),
    })))
}

/// Every deal plus counts by status
#[axum::debug_handler]
pub async fn list_deals(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let archival = &state.services.archival;
    Ok(Json(json!({
        "summary": archival.summary(),
        "deals": archival.deals(),
    })))
}

/// Deal for one CID as recorded
#[axum::debug_handler]
pub async fn get_deal(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse> {
    let deal = state
        .services
        .archival
        .deal(&cid)
        .ok_or_else(|| DurabilityError::NotFound(format!("No deal for {}", cid)))?;
    Ok(Json(deal))
}

/// Poll one deal now
#[axum::debug_handler]
pub async fn check_deal(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<impl IntoResponse> {
    let deal = state.services.archival.check_deal(&cid).await?;
    Ok(Json(deal))
}

/// Run the deal scheduler and poller now
#[axum::debug_handler]
pub async fn process_deals(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let archival = &state.services.archival;
    let scheduled = archival.process_scheduled_deals().await?;
    let polled = archival.check_pending_deals().await?;
    Ok(Json(json!({
        "scheduled": scheduled,
        "polled": polled,
        "summary": archival.summary(),
    })))
}

/// Restore archived content to hot storage
#[axum::debug_handler]
pub async fn retrieve_content(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RetrieveRequest>,
) -> Result<impl IntoResponse> {
    let restored = state.services.archival.retrieve(&request.cid).await?;
    if !restored {
        return Err(DurabilityError::NotFound(format!(
            "No active deal for {}",
            request.cid
        )));
    }
    Ok(Json(json!({ "cid": request.cid, "restored": true })))
}
