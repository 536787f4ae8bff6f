//! Network capability.
//!
//! Strategies, the lifecycle controller and the sync coordinator reach the
//! network only through [`Fetcher`]. A response with any status code is `Ok`;
//! `Err` means no response was obtained.

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::http::{resolve_url, FetchRequest, Headers, HttpResponse};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<HttpResponse>;
}

// == HTTP Fetcher ==
/// reqwest-backed fetcher. Relative URLs resolve against the app origin.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(base: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OfflineError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<HttpResponse> {
        let url = resolve_url(&self.base, &request.url)
            .ok_or_else(|| OfflineError::InvalidRequest(format!("Bad URL: {}", request.url)))?;
        let method = reqwest::Method::from_str(&request.method.to_ascii_uppercase())
            .map_err(|_| OfflineError::InvalidRequest(format!("Bad method: {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, url.clone())
            .headers(to_header_map(&request.headers));
        if let Some(body) = &request.body {
            if !matches!(request.method.to_ascii_uppercase().as_str(), "GET" | "HEAD") {
                builder = builder.body(body.clone());
            }
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<Headers>();
        let body = response.bytes().await?.to_vec();
        debug!("{} {} -> {}", request.method, url, status);

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}
