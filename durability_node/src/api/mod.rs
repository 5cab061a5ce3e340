// HTTP API for the durability node
//
// Every route lives under `/api` except the health endpoints, which are served
// at the root. Handlers return `Result<impl IntoResponse>` and rely on
// `DurabilityError`'s `IntoResponse` for the `{"error": {...}}` body.
//
// ```bash
// # Start a chunked upload
// curl -X POST -H "Content-Type: application/json" \
//   -d '{"filename":"a.bin","mimeType":"application/octet-stream","totalChunks":1,"totalSize":5}' \
//   http://localhost:8080/api/content/upload
//
// # Send chunk 0 as raw bytes
// curl -X POST --data-binary "@a.bin" "http://localhost:8080/api/content/upload/<id>/chunk?index=0"
//
// # Fetch the object
// curl http://localhost:8080/api/ipfs/<cid>
// ```

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{DurabilityError, Result};
use crate::runtime::DurabilityServices;
use crate::tasks::TaskScheduler;

mod archive_api;
mod gateway_api;
mod handlers;

/// State shared with every handler
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<DurabilityServices>,
    pub scheduler: Arc<TaskScheduler>,
}

/// HTTP server for a running node
pub struct ApiServer {
    app_state: Arc<AppState>,
    bind_address: String,
    max_body_size: usize,
}

impl ApiServer {
    pub fn new(services: Arc<DurabilityServices>, scheduler: Arc<TaskScheduler>) -> Self {
        let bind_address = services.config.api.listen_address();
        let max_body_size = services.config.api.max_body_size;
        Self {
            app_state: Arc::new(AppState { services, scheduler }),
            bind_address,
            max_body_size,
        }
    }

    /// Serve until the process stops
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let addr: SocketAddr = self
            .bind_address
            .parse()
            .map_err(|e| DurabilityError::Config(format!("Invalid bind address: {}", e)))?;

        info!("Starting API server on {}", self.bind_address);
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .map_err(|e| DurabilityError::Network(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Router with every endpoint and the shared state attached
    pub fn create_router(&self) -> Router {
        create_router(self.app_state.clone(), self.max_body_size)
    }
}

/// Build the router for `state`
pub fn create_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    let api = Router::new()
        // Chunked ingest
        .route("/content/upload", post(handlers::init_upload))
        .route("/content/upload/:upload_id/chunk", post(handlers::upload_chunk))
        .route("/content/upload/:upload_id/complete", post(handlers::complete_upload))
        .route("/content/status/:id", get(handlers::content_status))
        // Objects and pins
        .route("/ipfs/pin", post(handlers::pin_content))
        .route("/ipfs/pin/:cid", delete(handlers::unpin_content))
        .route("/ipfs/status/:cid", get(handlers::ipfs_status))
        .route("/ipfs/replicate/:cid", post(handlers::replicate_content))
        .route("/ipfs/metadata", post(handlers::store_metadata))
        .route("/ipfs/metadata/:cid", get(handlers::get_metadata))
        .route("/ipfs/:cid", get(handlers::get_content))
        // Gateways
        .route("/gateways/stats", get(gateway_api::gateway_stats))
        .route("/gateways/active", get(gateway_api::active_gateways))
        .route("/gateways/check/:url", get(gateway_api::check_gateway))
        .route("/gateways/add", post(gateway_api::add_gateway))
        .route("/gateways/refresh", post(gateway_api::refresh_gateways))
        // Archival deals
        .route("/filecoin/archive", post(archive_api::archive_content))
        .route("/filecoin/deals", get(archive_api::list_deals))
        .route("/filecoin/deals/:cid", get(archive_api::get_deal))
        .route("/filecoin/check/:cid", get(archive_api::check_deal))
        .route("/filecoin/process-deals", post(archive_api::process_deals))
        .route("/filecoin/retrieve", post(archive_api::retrieve_content));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SimulatedArchivalClient;
    use crate::config::{Config, NodeConfig};
    use crate::events::EventBus;
    use crate::gateway::{GatewayRouter, GatewayTransport};
    use async_trait::async_trait;
    use axum::body::{Body, HttpBody};
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use tower::ServiceExt;

    /// Gateways that never have anything, so reads fall back to the node pool
    struct OfflineGateways;

    #[async_trait]
    impl GatewayTransport for OfflineGateways {
        async fn head(&self, _url: &str) -> Result<()> {
            Err(DurabilityError::Network("offline".to_string()))
        }

        async fn get(&self, _url: &str) -> Result<Bytes> {
            Err(DurabilityError::Network("offline".to_string()))
        }
    }

    async fn test_router(dir: &std::path::Path) -> (Router, Arc<DurabilityServices>) {
        test_router_with_nodes(dir, 3).await
    }

    async fn test_router_with_nodes(
        dir: &std::path::Path,
        node_count: usize,
    ) -> (Router, Arc<DurabilityServices>) {
        let mut config = Config::default();
        config.nodes = (0..node_count)
            .map(|i| NodeConfig {
                id: format!("node-{}", i),
                endpoint: format!("memory://node-{}", i),
                region: None,
                priority: 90,
            })
            .collect();
        config.gateways.public = vec!["https://gw.test/ipfs/".to_string()];
        config.archival.data_dir = dir.join("archive");
        config.ingest.temp_dir = dir.join("temp");

        let events = EventBus::default();
        let gateways = Arc::new(GatewayRouter::new(
            config.gateways.clone(),
            Arc::new(OfflineGateways),
            events.clone(),
        ));
        let services = Arc::new(
            DurabilityServices::assemble(
                &config,
                events,
                gateways,
                Arc::new(SimulatedArchivalClient::new()),
            )
            .await
            .unwrap(),
        );
        services.monitor.probe_all().await;

        let state = Arc::new(AppState {
            services: services.clone(),
            scheduler: Arc::new(TaskScheduler::new()),
        });
        (create_router(state, 1024 * 1024), services)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        let mut body = response.into_body();
        let mut out = Vec::new();
        while let Some(chunk) = body.data().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::builder().uri("/health/detailed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chunked_upload_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/content/upload",
                serde_json::json!({
                    "filename": "hello.txt",
                    "mimeType": "text/plain",
                    "totalChunks": 2,
                    "totalSize": 11
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let upload_id = body_json(response).await["uploadId"]
            .as_str()
            .unwrap()
            .to_string();

        // Raw body with the index in the query
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/content/upload/{}/chunk?index=1", upload_id))
                    .body(Body::from(" world"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // JSON body with base64 data
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/content/upload/{}/chunk", upload_id),
                serde_json::json!({ "chunkIndex": 0, "data": "aGVsbG8=" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/content/upload/{}/complete", upload_id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let done = body_json(response).await;
        let cid = done["cid"].as_str().unwrap().to_string();
        assert_eq!(done["sizeBytes"], 11);
        assert_eq!(done["replicas"], 3);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/ipfs/{}", cid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"hello world");

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/content/status/{}", upload_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "completed");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/ipfs/bafymissing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let message = body_json(response).await["error"]["message"].clone();
        assert!(message.as_str().unwrap().contains("https://gw.test/ipfs/"));

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ipfs/replicate/bafymissing",
                serde_json::json!({ "replicationFactor": 11 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/filecoin/archive",
                serde_json::json!({ "contentId": "c1", "cid": "bafymissing" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/content/status/nothing-here")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_read_reports_gateways_when_nodes_also_fail() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = test_router_with_nodes(dir.path(), 0).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ipfs/bafyunreachable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(
            body["error"]["attempted"],
            serde_json::json!(["https://gw.test/ipfs/"])
        );
    }

    #[tokio::test]
    async fn test_metadata_and_archive_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (router, services) = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/ipfs/metadata",
                serde_json::json!({ "title": "report", "pages": 3 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cid = body_json(response).await["cid"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/ipfs/metadata/{}", cid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["title"], "report");

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/filecoin/archive",
                serde_json::json!({ "contentId": "meta-1", "cid": cid }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(json_request("POST", "/api/filecoin/process-deals", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(services.archival.deal(&cid).is_some());

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/filecoin/deals/{}", cid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
