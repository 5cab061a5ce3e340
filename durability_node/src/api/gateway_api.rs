// Gateway API
//
// Pool statistics, manual probes and custom gateway registration.

use crate::api::AppState;
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
pub struct AddGatewayRequest {
    pub url: String,
}

/// Pool statistics with every endpoint
#[axum::debug_handler]
pub async fn gateway_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(state.services.gateways.stats()))
}

/// Currently available gateways
#[axum::debug_handler]
pub async fn active_gateways(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(state.services.gateways.active()))
}

/// Probe one gateway; the URL arrives percent-encoded in the path
#[axum::debug_handler]
pub async fn check_gateway(
    State(state): State<Arc<AppState>>,
    Path(url): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.services.gateways.probe(&url).await))
}

/// Register a custom gateway after a successful probe
#[axum::debug_handler]
pub async fn add_gateway(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddGatewayRequest>,
) -> Result<impl IntoResponse> {
    if request.url.is_empty() {
        return Err(DurabilityError::InvalidRequest("url is required".to_string()));
    }

    let added = state.services.gateways.add_custom(&request.url).await?;
    info!("Custom gateway {} added: {}", request.url, added);
    Ok(Json(json!({ "url": request.url, "added": added })))
}

/// Probe every gateway now
#[axum::debug_handler]
pub async fn refresh_gateways(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let probes = state.services.gateways.probe_all().await;
    let available = probes.iter().filter(|p| p.ok).count();
    Ok(Json(json!({
        "checked": probes.len(),
        "available": available,
        "results": probes,
    })))
}
