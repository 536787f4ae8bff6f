//! Response DTOs for the worker API

use serde::Serialize;

use crate::cache::CacheStats;
use crate::config::{StrategyName, StrategyRule};
use crate::lifecycle::LifecycleState;
use crate::queue::QueueCounts;

/// Cache counters plus the derived hit rate.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        let hit_rate = stats.hit_rate();
        Self { stats, hit_rate }
    }
}

/// Response body for `GET /status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub enabled: bool,
    pub cache_version: u32,
    pub default_strategy: StrategyName,
    pub strategies: Vec<StrategyRule>,
    pub online: bool,
    pub lifecycle: LifecycleState,
    /// Cache stores currently present
    pub caches: Vec<String>,
    pub cache: CacheStatsResponse,
    pub queue: QueueCounts,
}

/// Response body for `DELETE /queue/failed`
#[derive(Debug, Clone, Serialize)]
pub struct ClearFailedResponse {
    pub message: String,
    pub removed: usize,
}

impl ClearFailedResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Cleared {} failed requests", removed),
            removed,
        }
    }
}

/// Response body for `POST /intercept`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum InterceptResponse {
    /// The page should send the request itself
    Proceed,
    Queued {
        id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply: Option<crate::http::HttpResponse>,
    },
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
