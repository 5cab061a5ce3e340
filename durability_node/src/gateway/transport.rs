// Gateway transport
//
// The router never issues HTTP itself; probes and fetches go through a
// `GatewayTransport` so tests can substitute an in-process implementation.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{DurabilityError, Result};

/// HEAD/GET access to public gateways
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// HEAD a full object URL; any 2xx is success
    async fn head(&self, url: &str) -> Result<()>;

    /// GET a full object URL and return the body
    async fn get(&self, url: &str) -> Result<Bytes>;
}

/// reqwest-backed gateway transport
pub struct HttpGatewayTransport {
    client: reqwest::Client,
}

impl HttpGatewayTransport {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(DurabilityError::NotFound(format!("{} returned 404", url)))
    } else {
        Err(DurabilityError::Network(format!("{} returned HTTP {}", url, status)))
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    async fn head(&self, url: &str) -> Result<()> {
        let response = self.client.head(url).send().await?;
        check_status(url, response.status())
    }

    async fn get(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        check_status(url, response.status())?;
        Ok(response.bytes().await?)
    }
}
