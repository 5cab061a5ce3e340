// Error handling module for the durability node
//
// This module defines the error taxonomy shared by every component and the
// mapping from errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::io;
use std::result;
use thiserror::Error;

/// Result type for durability node operations
pub type Result<T> = result::Result<T, DurabilityError>;

/// Error type for durability node operations
#[derive(Debug, Error, Clone)]
pub enum DurabilityError {
    /// Object absent everywhere
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object known but currently unreachable from any endpoint
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Replication ended below the required replica count
    #[error("Insufficient replicas for {cid}: achieved {achieved} of {required}")]
    InsufficientReplicas {
        cid: String,
        achieved: usize,
        required: usize,
    },

    /// Chunked upload finalized before every chunk arrived
    #[error("Upload incomplete: received {received} of {total} chunks")]
    UploadIncomplete { received: u32, total: u32 },

    /// No storage node is currently healthy
    #[error("No healthy storage nodes available")]
    NoHealthyNodes,

    /// Every gateway in the fallback chain failed
    #[error("No gateway reachable (attempted: {})", .attempted.join(", "))]
    NoHealthyGateways { attempted: Vec<String> },

    /// Archival deal could not be made or tracked
    #[error("Deal failed: {0}")]
    DealFailed(String),

    /// Caller supplied an invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage errors (temp files, ledger)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption-related errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP request errors
    #[error("Request error: {0}")]
    Request(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(String),

    /// SQLite errors
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Serialization-related errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DurabilityError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DurabilityError::NotFound(_) => StatusCode::NOT_FOUND,
            DurabilityError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DurabilityError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DurabilityError::InsufficientReplicas { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DurabilityError::UploadIncomplete { .. } => StatusCode::CONFLICT,
            DurabilityError::NoHealthyNodes => StatusCode::SERVICE_UNAVAILABLE,
            DurabilityError::NoHealthyGateways { .. } => StatusCode::BAD_GATEWAY,
            DurabilityError::DealFailed(_) => StatusCode::BAD_GATEWAY,
            DurabilityError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DurabilityError::Json(_) => StatusCode::BAD_REQUEST,
            DurabilityError::Network(_) | DurabilityError::Request(_) => StatusCode::BAD_GATEWAY,
            DurabilityError::Config(_)
            | DurabilityError::Storage(_)
            | DurabilityError::Encryption(_)
            | DurabilityError::Io(_)
            | DurabilityError::Sqlite(_)
            | DurabilityError::Serialization(_)
            | DurabilityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implement IntoResponse for DurabilityError so it can be returned directly from handlers
impl IntoResponse for DurabilityError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut error = serde_json::json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        });
        if let DurabilityError::NoHealthyGateways { attempted } = &self {
            error["attempted"] = serde_json::json!(attempted);
        }

        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}

impl From<rusqlite::Error> for DurabilityError {
    fn from(err: rusqlite::Error) -> Self {
        DurabilityError::Sqlite(err.to_string())
    }
}

impl From<io::Error> for DurabilityError {
    fn from(err: io::Error) -> Self {
        DurabilityError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for DurabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DurabilityError::Timeout
        } else {
            DurabilityError::Request(err.to_string())
        }
    }
}

impl From<toml::ser::Error> for DurabilityError {
    fn from(err: toml::ser::Error) -> Self {
        DurabilityError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DurabilityError {
    fn from(err: toml::de::Error) -> Self {
        DurabilityError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DurabilityError {
    fn from(err: serde_json::Error) -> Self {
        DurabilityError::Json(err.to_string())
    }
}

impl From<config::ConfigError> for DurabilityError {
    fn from(err: config::ConfigError) -> Self {
        DurabilityError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DurabilityError {
    fn from(err: tokio::task::JoinError) -> Self {
        DurabilityError::Internal(format!("Task panicked: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DurabilityError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DurabilityError::UploadIncomplete { received: 1, total: 3 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DurabilityError::NoHealthyGateways { attempted: vec![] }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_no_healthy_gateways_lists_attempts() {
        let err = DurabilityError::NoHealthyGateways {
            attempted: vec!["https://a/ipfs/".into(), "https://b/ipfs/".into()],
        };
        assert_eq!(
            err.to_string(),
            "No gateway reachable (attempted: https://a/ipfs/, https://b/ipfs/)"
        );
    }
}
