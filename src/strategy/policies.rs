//! The five caching policies.

use tracing::{debug, info, warn};

use super::{ResponseSource, Served, StrategyEngine};
use crate::cache::CacheEntry;
use crate::config::StrategyName;
use crate::error::{OfflineError, Result};
use crate::http::{FetchRequest, HttpResponse};

impl StrategyEngine {
    // == Cache First ==
    /// Fresh cache entry, else network (cached on 2xx). On network failure a
    /// stale entry beats the offline page.
    pub(super) async fn cache_first(&self, request: FetchRequest) -> Result<Served> {
        const STRATEGY: StrategyName = StrategyName::CacheFirst;
        let cached = self.lookup(&request).await;

        if let Some(entry) = &cached {
            if self.cache.is_fresh(entry) {
                debug!("Cache hit: {}", request.url);
                return Ok(served(entry.response.clone(), ResponseSource::Cache, STRATEGY));
            }
        }

        debug!("Cache miss or stale, fetching: {}", request.url);
        match self.fetch_and_cache(&request).await {
            Ok(response) => Ok(served(response, ResponseSource::Network, STRATEGY)),
            Err(err) => {
                if let Some(entry) = cached {
                    info!("Network failed, serving stale entry: {}", request.url);
                    return Ok(served(entry.response, ResponseSource::StaleCache, STRATEGY));
                }
                self.offline_fallback(&request, STRATEGY, err).await
            }
        }
    }

    // == Network First ==
    /// Network raced against `network_timeout`; any cached entry on loss.
    ///
    /// The fetch runs in its own task. When the timer wins, that task keeps
    /// going and still writes a successful response into the cache.
    pub(super) async fn network_first(&self, request: FetchRequest) -> Result<Served> {
        const STRATEGY: StrategyName = StrategyName::NetworkFirst;

        let engine = self.clone();
        let in_flight = request.clone();
        let fetch = tokio::spawn(async move { engine.fetch_and_cache(&in_flight).await });

        let err = match tokio::time::timeout(self.network_timeout, fetch).await {
            Ok(Ok(Ok(response))) => {
                debug!("Network success: {}", request.url);
                return Ok(served(response, ResponseSource::Network, STRATEGY));
            }
            Ok(Ok(Err(err))) => err,
            Ok(Err(join_err)) => OfflineError::Internal(format!("Fetch task failed: {}", join_err)),
            Err(_) => {
                info!(
                    "Network timeout after {}ms: {}",
                    self.network_timeout.as_millis(),
                    request.url
                );
                OfflineError::Timeout(self.network_timeout.as_millis() as u64)
            }
        };

        if let Some(entry) = self.lookup(&request).await {
            debug!("Cache hit after network failure: {}", request.url);
            let source = self.freshness_source(&entry);
            return Ok(served(entry.response, source, STRATEGY));
        }
        self.offline_fallback(&request, STRATEGY, err).await
    }

    // == Stale While Revalidate ==
    /// Cached entry immediately (any age) with a background refresh whose
    /// failure is swallowed; without an entry, the network result.
    pub(super) async fn stale_while_revalidate(&self, request: FetchRequest) -> Result<Served> {
        const STRATEGY: StrategyName = StrategyName::StaleWhileRevalidate;

        if let Some(entry) = self.lookup(&request).await {
            let engine = self.clone();
            let background = request.clone();
            tokio::spawn(async move {
                if let Err(err) = engine.fetch_and_cache(&background).await {
                    debug!("Background fetch failed for {}: {}", background.url, err);
                }
            });
            debug!("Serving cached entry, revalidating: {}", request.url);
            let source = self.freshness_source(&entry);
            return Ok(served(entry.response, source, STRATEGY));
        }

        debug!("No cache, waiting for network: {}", request.url);
        let response = self.fetch_and_cache(&request).await?;
        Ok(served(response, ResponseSource::Network, STRATEGY))
    }

    // == Network Only ==
    pub(super) async fn network_only(&self, request: FetchRequest) -> Result<Served> {
        const STRATEGY: StrategyName = StrategyName::NetworkOnly;
        match self.fetcher.fetch(&request).await {
            Ok(response) => Ok(served(response, ResponseSource::Network, STRATEGY)),
            Err(err) => self.offline_fallback(&request, STRATEGY, err).await,
        }
    }

    // == Cache Only ==
    pub(super) async fn cache_only(&self, request: FetchRequest) -> Result<Served> {
        const STRATEGY: StrategyName = StrategyName::CacheOnly;
        if let Some(entry) = self.lookup(&request).await {
            let source = self.freshness_source(&entry);
            return Ok(served(entry.response, source, STRATEGY));
        }
        let err = OfflineError::NotFound(request.url.clone());
        self.offline_fallback(&request, STRATEGY, err).await
    }

    // == Helpers ==
    /// Fetches and, on 2xx, writes the response to cache.
    ///
    /// A failed cache write does not fail the request.
    async fn fetch_and_cache(&self, request: &FetchRequest) -> Result<HttpResponse> {
        let response = self.fetcher.fetch(request).await?;
        if response.is_success() {
            if let Err(err) = self.cache.put(request, response.clone()).await {
                warn!("Failed to cache {}: {}", request.url, err);
            }
        } else {
            debug!("Not caching {} response for {}", response.status, request.url);
        }
        Ok(response)
    }

    /// Cache lookup where a storage failure reads as a miss.
    async fn lookup(&self, request: &FetchRequest) -> Option<CacheEntry> {
        match self.cache.match_request(request).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Cache lookup failed for {}: {}", request.url, err);
                None
            }
        }
    }

    fn freshness_source(&self, entry: &CacheEntry) -> ResponseSource {
        if self.cache.is_fresh(entry) {
            ResponseSource::Cache
        } else {
            ResponseSource::StaleCache
        }
    }

    /// Navigations get the precached offline page; everything else gets `err`.
    async fn offline_fallback(
        &self,
        request: &FetchRequest,
        strategy: StrategyName,
        err: OfflineError,
    ) -> Result<Served> {
        if request.is_navigation() {
            match self.cache.offline_page().await {
                Ok(Some(page)) => {
                    info!("Serving offline page for {}", request.url);
                    return Ok(served(page, ResponseSource::OfflinePage, strategy));
                }
                Ok(None) => warn!("Offline page is not cached"),
                Err(lookup_err) => warn!("Offline page lookup failed: {}", lookup_err),
            }
        }
        Err(err)
    }
}

fn served(response: HttpResponse, source: ResponseSource, strategy: StrategyName) -> Served {
    Served {
        response,
        source,
        strategy,
    }
}
