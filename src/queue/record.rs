//! Queue record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OfflineError;
use crate::http::{FetchRequest, Headers, RequestMode};

// == Queue Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Awaiting (re)play
    Pending,
    /// Retry budget exhausted; kept until cleared
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(OfflineError::Storage(format!("Unknown queue status '{}'", other))),
        }
    }
}

// == Queued Request ==
/// One deferred mutating request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    /// Auto-incrementing; ascending id is replay order
    pub id: i64,
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
    /// Origin tag (`type`, `intercepted`, `formId`, ...)
    pub metadata: serde_json::Value,
    pub created_at: u64,
    pub status: QueueStatus,
    pub retries: u32,
    pub last_attempt: Option<u64>,
    pub last_error: Option<String>,
}

impl QueuedRequest {
    /// The request to replay against the network.
    pub fn to_fetch_request(&self) -> FetchRequest {
        FetchRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            mode: RequestMode::Other,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Fields of an entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueuedRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: u64,
}

impl NewQueuedRequest {
    pub(crate) fn into_record(self, id: i64) -> QueuedRequest {
        QueuedRequest {
            id,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            metadata: self.metadata,
            created_at: self.created_at,
            status: QueueStatus::Pending,
            retries: 0,
            last_attempt: None,
            last_error: None,
        }
    }
}

// == Queue Update ==
/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueUpdate {
    pub status: Option<QueueStatus>,
    pub retries: Option<u32>,
    pub last_attempt: Option<u64>,
    pub last_error: Option<String>,
}

impl QueueUpdate {
    pub fn apply(&self, record: &mut QueuedRequest) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(retries) = self.retries {
            record.retries = retries;
        }
        if let Some(at) = self.last_attempt {
            record.last_attempt = Some(at);
        }
        if let Some(err) = &self.last_error {
            record.last_error = Some(err.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub failed: usize,
}
