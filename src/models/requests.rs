//! Request DTOs for the worker API

use serde::Deserialize;

use crate::http::{FetchRequest, RequestMode};

/// Query of `GET /fetch`.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchQuery {
    /// Absolute or origin-relative URL
    pub url: String,
    #[serde(default)]
    pub mode: RequestMode,
}

impl FetchQuery {
    /// Validates the query
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.url.trim().is_empty() {
            return Some("url cannot be empty".to_string());
        }
        None
    }

    pub fn into_request(self) -> FetchRequest {
        FetchRequest {
            mode: self.mode,
            ..FetchRequest::get(self.url)
        }
    }
}

/// Body of `PUT /connectivity`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConnectivityUpdate {
    pub online: bool,
}
