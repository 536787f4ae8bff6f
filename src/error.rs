//! Error types for the offline engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Offline Error Enum ==
/// Unified error type for the offline engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OfflineError {
    /// No response could be obtained (offline, DNS, connection reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The network did not answer within the configured timeout (ms)
    #[error("Network timeout after {0}ms")]
    Timeout(u64),

    /// Cache-only lookup with nothing stored
    #[error("Not found in cache: {0}")]
    NotFound(String),

    /// Durable store transaction failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Durable store is out of space
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Malformed configuration or failed precache
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Queue entry does not exist (already replayed or cleared)
    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(i64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OfflineError {
    /// True when no response was obtained from the network.
    pub fn is_network(&self) -> bool {
        matches!(self, OfflineError::Network(_) | OfflineError::Timeout(_))
    }

    /// True for durable-store failures the user should be warned about.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            OfflineError::Storage(_) | OfflineError::QuotaExceeded(_)
        )
    }
}

// == Conversions ==
impl From<rusqlite::Error> for OfflineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::DiskFull =>
            {
                OfflineError::QuotaExceeded(err.to_string())
            }
            _ => OfflineError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        OfflineError::Storage(format!("Corrupt record: {}", err))
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        OfflineError::Network(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for OfflineError {
    fn into_response(self) -> Response {
        let status = match &self {
            OfflineError::Network(_) | OfflineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OfflineError::NotFound(_) | OfflineError::QueueEntryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            OfflineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OfflineError::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            OfflineError::Storage(_) | OfflineError::Config(_) | OfflineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the offline engine.
pub type Result<T> = std::result::Result<T, OfflineError>;
