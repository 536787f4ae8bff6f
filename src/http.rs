//! HTTP value types shared by the strategy engine, the queue and the fetcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

/// Header map with deterministic ordering.
pub type Headers = BTreeMap<String, String>;

/// Verbs that mutate server state and therefore belong to the queue path.
pub const MUTATING_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Returns true for POST/PUT/PATCH/DELETE (case-insensitive).
pub fn is_mutating(method: &str) -> bool {
    MUTATING_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

/// Resolves `raw` (absolute or relative) against `base`.
pub fn resolve_url(base: &Url, raw: &str) -> Option<Url> {
    base.join(raw).ok()
}

// == Request Mode ==
/// How the request was initiated. Navigations get the offline page fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    #[default]
    Other,
}

// == Fetch Request ==
/// An outbound request as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub mode: RequestMode,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
}

impl FetchRequest {
    /// Plain GET (sub-resource or API call).
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            mode: RequestMode::Other,
            headers: Headers::new(),
            body: None,
        }
    }

    /// GET issued by a page navigation.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

// == HTTP Response ==
/// A response body plus the metadata needed to replay it from cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Only 2xx responses are cacheable and count as a successful replay.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

fn canonical_reason(status: u16) -> &'static str {
    axum::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mutating() {
        assert!(is_mutating("post"));
        assert!(is_mutating("DELETE"));
        assert!(!is_mutating("GET"));
        assert!(!is_mutating("HEAD"));
    }

    #[test]
    fn test_resolve_relative_url() {
        let base = Url::parse("http://localhost:8000/").unwrap();
        let url = resolve_url(&base, "/orders?id=1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/orders?id=1");

        let abs = resolve_url(&base, "https://cdn.example.com/app.js").unwrap();
        assert_eq!(abs.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
        assert_eq!(HttpResponse::new(404, "").status_text, "Not Found");
    }

    #[test]
    fn test_response_body_serializes_as_text() {
        let json = serde_json::to_value(HttpResponse::new(200, "hello")).unwrap();
        assert_eq!(json["body"], "hello");
    }
}
