//! Strategy Engine
//!
//! Dispatches GET requests to one of five caching policies. Each policy is an
//! async function of the request that yields a [`Served`] response or a
//! well-defined error.

mod policies;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::cache::CacheManager;
use crate::config::{Config, StrategyName};
use crate::error::{OfflineError, Result};
use crate::fetch::Fetcher;
use crate::http::{FetchRequest, HttpResponse};
use crate::matcher::StrategyMatcher;

// == Response Source ==
/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// Fresh cache entry
    Cache,
    /// Cache entry past its freshness window
    StaleCache,
    Network,
    /// Precached offline page substituted for a failed navigation
    OfflinePage,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::StaleCache => "stale-cache",
            ResponseSource::Network => "network",
            ResponseSource::OfflinePage => "offline-page",
        }
    }
}

/// Outcome of one strategy run.
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub response: HttpResponse,
    pub source: ResponseSource,
    pub strategy: StrategyName,
}

// == Strategy Engine ==
/// Cheap to clone; background revalidation tasks hold their own handle.
#[derive(Clone)]
pub struct StrategyEngine {
    cache: Arc<CacheManager>,
    fetcher: Arc<dyn Fetcher>,
    matcher: Arc<StrategyMatcher>,
    network_timeout: Duration,
    enabled: bool,
}

impl StrategyEngine {
    pub fn new(
        config: &Config,
        cache: Arc<CacheManager>,
        fetcher: Arc<dyn Fetcher>,
        matcher: Arc<StrategyMatcher>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            matcher,
            network_timeout: config.network_timeout(),
            enabled: config.enabled,
        }
    }

    /// Boundary entry point.
    ///
    /// Only GET requests over http(s) are handled; anything else is rejected
    /// with [`OfflineError::InvalidRequest`] so the caller lets it pass through.
    /// With the engine disabled every request goes straight to the network.
    pub async fn handle(&self, request: FetchRequest) -> Result<Served> {
        if !request.is_get() {
            debug!("Ignoring non-GET request: {} {}", request.method, request.url);
            return Err(OfflineError::InvalidRequest(format!(
                "{} requests are not handled by cache strategies",
                request.method
            )));
        }
        if !is_http_scheme(&request.url) {
            return Err(OfflineError::InvalidRequest(format!(
                "Unsupported scheme: {}",
                request.url
            )));
        }

        let strategy = if self.enabled {
            self.matcher.resolve(&request.url)
        } else {
            StrategyName::NetworkOnly
        };
        debug!("Using strategy {} for {}", strategy, request.url);
        self.apply(strategy, request).await
    }

    /// Runs one named strategy.
    pub async fn apply(&self, strategy: StrategyName, request: FetchRequest) -> Result<Served> {
        match strategy {
            StrategyName::CacheFirst => self.cache_first(request).await,
            StrategyName::NetworkFirst => self.network_first(request).await,
            StrategyName::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            StrategyName::NetworkOnly => self.network_only(request).await,
            StrategyName::CacheOnly => self.cache_only(request).await,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }
}

/// Relative URLs and http(s) URLs pass; other schemes (extensions, data:) do not.
fn is_http_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"),
        None => !url.contains(':') || url.starts_with('/'),
    }
}
