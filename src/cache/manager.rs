//! Cache Manager Module
//!
//! Sits between the strategies and a [`KeyValueCacheStore`]: picks the cache
//! family for a request, builds versioned store names and request identities,
//! stamps writes, checks freshness and keeps every store within its budget.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheEntry, CacheStats, KeyValueCacheStore};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::http::{resolve_url, FetchRequest, HttpResponse};
use crate::matcher::StrategyMatcher;

// == Cache Family ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFamily {
    Pages,
    Assets,
    Api,
    Runtime,
}

impl CacheFamily {
    pub const ALL: [CacheFamily; 4] = [
        CacheFamily::Pages,
        CacheFamily::Assets,
        CacheFamily::Api,
        CacheFamily::Runtime,
    ];
}

impl fmt::Display for CacheFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheFamily::Pages => "pages",
            CacheFamily::Assets => "assets",
            CacheFamily::Api => "api",
            CacheFamily::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

// == Cache Manager ==
pub struct CacheManager {
    store: Arc<dyn KeyValueCacheStore>,
    clock: Arc<dyn Clock>,
    matcher: Arc<StrategyMatcher>,
    base: Url,
    /// Versioned names indexed like `CacheFamily::ALL`
    names: [String; 4],
    max_age_secs: u64,
    max_items: usize,
    exclude_query_string: bool,
    api_marker: String,
    offline_url: String,
    /// Precache and offline-page identities; never evicted
    pinned: HashSet<String>,
    stats: Mutex<CacheStats>,
}

impl CacheManager {
    // == Constructor ==
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueCacheStore>,
        clock: Arc<dyn Clock>,
        matcher: Arc<StrategyMatcher>,
    ) -> Result<Self> {
        let version = config.cache_version;
        let families = &config.cache_names;
        let names = [
            format!("{}-v{}", families.pages, version),
            format!("{}-v{}", families.assets, version),
            format!("{}-v{}", families.api, version),
            format!("{}-v{}", families.runtime, version),
        ];

        let mut manager = Self {
            store,
            clock,
            matcher,
            base: config.origin_url()?,
            names,
            max_age_secs: config.cache.max_age,
            max_items: config.cache.max_items,
            exclude_query_string: config.cache.exclude_query_string,
            api_marker: config.cache.api_marker.clone(),
            offline_url: config.offline_url.clone(),
            pinned: HashSet::new(),
            stats: Mutex::new(CacheStats::new()),
        };
        let pinned = config
            .precache
            .iter()
            .chain(std::iter::once(&config.offline_url))
            .map(|url| manager.request_key(&FetchRequest::get(url.clone())))
            .collect();
        manager.pinned = pinned;
        Ok(manager)
    }

    // == Naming ==
    /// Versioned store name for a family, e.g. `offline-pages-v2`.
    pub fn cache_name(&self, family: CacheFamily) -> &str {
        let idx = match family {
            CacheFamily::Pages => 0,
            CacheFamily::Assets => 1,
            CacheFamily::Api => 2,
            CacheFamily::Runtime => 3,
        };
        &self.names[idx]
    }

    /// The store names valid for the current cache version.
    pub fn valid_names(&self) -> Vec<String> {
        self.names.to_vec()
    }

    /// Assets, then API, then navigations; everything else is runtime.
    pub fn family_for(&self, request: &FetchRequest) -> CacheFamily {
        if self.matcher.is_asset(&request.url) {
            CacheFamily::Assets
        } else if request.url.contains(&self.api_marker) {
            CacheFamily::Api
        } else if request.is_navigation() {
            CacheFamily::Pages
        } else {
            CacheFamily::Runtime
        }
    }

    /// Normalized request identity: upper-case method plus absolute URL.
    ///
    /// Fragments are always dropped; the query string is dropped when
    /// `exclude_query_string` is set.
    pub fn request_key(&self, request: &FetchRequest) -> String {
        let method = request.method.to_ascii_uppercase();
        match resolve_url(&self.base, &request.url) {
            Some(mut url) => {
                url.set_fragment(None);
                if self.exclude_query_string {
                    url.set_query(None);
                }
                format!("{} {}", method, url)
            }
            None => format!("{} {}", method, request.url),
        }
    }

    // == Lookup ==
    /// Finds a cached response for the request.
    ///
    /// The request's own family is searched first, then the other current
    /// stores. Stores from older versions are never consulted.
    pub async fn match_request(&self, request: &FetchRequest) -> Result<Option<CacheEntry>> {
        let key = self.request_key(request);
        let own = self.family_for(request);
        let order = std::iter::once(own).chain(CacheFamily::ALL.into_iter().filter(|f| *f != own));

        for family in order {
            if let Some(entry) = self.store.get(self.cache_name(family), &key).await? {
                debug!("Cache hit in {}: {}", self.cache_name(family), key);
                self.with_stats(|s| s.record_hit());
                return Ok(Some(entry));
            }
        }

        debug!("Cache miss: {}", key);
        self.with_stats(|s| s.record_miss());
        Ok(None)
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.is_fresh_at(self.clock.now_ms(), self.max_age_secs)
    }

    /// The precached offline page, if present.
    pub async fn offline_page(&self) -> Result<Option<HttpResponse>> {
        let key = self.request_key(&FetchRequest::get(self.offline_url.clone()));
        for family in CacheFamily::ALL {
            if let Some(entry) = self.store.get(self.cache_name(family), &key).await? {
                self.with_stats(|s| s.record_offline_fallback());
                return Ok(Some(entry.response));
            }
        }
        Ok(None)
    }

    // == Write ==
    /// Stores a response under the request's family, then enforces the budget.
    pub async fn put(&self, request: &FetchRequest, response: HttpResponse) -> Result<()> {
        let family = self.family_for(request);
        let key = self.request_key(request);
        self.put_in(family, &key, response).await
    }

    /// Stores a response in an explicit family. Writing always stamps
    /// `cached_at = now`.
    pub async fn put_in(&self, family: CacheFamily, key: &str, response: HttpResponse) -> Result<()> {
        let cache_name = self.cache_name(family).to_string();
        let entry = CacheEntry::new(response, self.clock.now_ms());
        self.store.put(&cache_name, key, entry).await?;
        self.with_stats(|s| s.record_write());
        self.enforce_limits(&cache_name).await?;
        Ok(())
    }

    pub async fn delete(&self, request: &FetchRequest) -> Result<bool> {
        let key = self.request_key(request);
        let mut removed = false;
        for family in CacheFamily::ALL {
            removed |= self.store.delete(self.cache_name(family), &key).await?;
        }
        Ok(removed)
    }

    /// True for the precached resources and the offline page.
    pub fn is_pinned(&self, key: &str) -> bool {
        self.pinned.contains(key)
    }

    // == Enforce Limits ==
    /// Evicts first-written keys until the store holds at most `max_items`.
    ///
    /// Pinned keys are skipped, so a store holding more pinned entries than
    /// the budget stays over it. Returns the number of evicted entries.
    pub async fn enforce_limits(&self, cache_name: &str) -> Result<usize> {
        let keys = self.store.keys(cache_name).await?;
        if keys.len() <= self.max_items {
            return Ok(0);
        }

        let excess = keys.len() - self.max_items;
        let victims: Vec<&String> = keys
            .iter()
            .filter(|key| !self.is_pinned(key))
            .take(excess)
            .collect();
        for key in &victims {
            self.store.delete(cache_name, key).await?;
            debug!("Evicted {} from {}", key, cache_name);
        }
        let evicted = victims.len();
        self.with_stats(|s| s.record_evictions(evicted));
        Ok(evicted)
    }

    // == Store Management ==
    pub async fn open(&self, family: CacheFamily) -> Result<()> {
        self.store.open(self.cache_name(family)).await
    }

    pub async fn list_keys(&self, cache_name: &str) -> Result<Vec<String>> {
        self.store.keys(cache_name).await
    }

    pub async fn cache_names(&self) -> Result<Vec<String>> {
        self.store.cache_names().await
    }

    /// Deletes every store whose name is not in `valid`. Returns the deleted names.
    pub async fn delete_caches_not_in(&self, valid: &[String]) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.store.cache_names().await? {
            if !valid.contains(&name) {
                info!("Deleting old cache: {}", name);
                self.store.delete_cache(&name).await?;
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Deletes every store unconditionally. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let names = self.store.cache_names().await?;
        for name in &names {
            info!("Clearing cache: {}", name);
            self.store.delete_cache(name).await?;
        }
        Ok(names.len())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clock::ManualClock;

    fn manager_with(config: Config) -> (CacheManager, Arc<ManualClock>, Arc<MemoryCacheStore>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryCacheStore::new());
        let matcher = Arc::new(StrategyMatcher::new(&config).unwrap());
        let manager = CacheManager::new(&config, store.clone(), clock.clone(), matcher).unwrap();
        (manager, clock, store)
    }

    fn manager() -> (CacheManager, Arc<ManualClock>, Arc<MemoryCacheStore>) {
        manager_with(Config::default())
    }

    #[test]
    fn test_versioned_names() {
        let config = Config {
            cache_version: 7,
            ..Config::default()
        };
        let (manager, _, _) = manager_with(config);
        assert_eq!(manager.cache_name(CacheFamily::Pages), "offline-pages-v7");
        assert_eq!(manager.cache_name(CacheFamily::Runtime), "offline-runtime-v7");
        assert_eq!(manager.valid_names().len(), 4);
    }

    #[test]
    fn test_family_selection() {
        let (manager, _, _) = manager();
        assert_eq!(manager.family_for(&FetchRequest::get("/css/app.css")), CacheFamily::Assets);
        assert_eq!(manager.family_for(&FetchRequest::get("/api/users")), CacheFamily::Api);
        assert_eq!(manager.family_for(&FetchRequest::navigate("/about")), CacheFamily::Pages);
        assert_eq!(manager.family_for(&FetchRequest::get("/partials/nav")), CacheFamily::Runtime);
    }

    #[test]
    fn test_request_key_normalization() {
        let (manager, _, _) = manager();
        assert_eq!(
            manager.request_key(&FetchRequest::get("/a?x=1#top")),
            "GET http://localhost:8000/a?x=1"
        );

        let mut config = Config::default();
        config.cache.exclude_query_string = true;
        let (manager, _, _) = manager_with(config);
        assert_eq!(
            manager.request_key(&FetchRequest::get("/a?x=1")),
            "GET http://localhost:8000/a"
        );
    }

    #[tokio::test]
    async fn test_put_stamps_and_matches() {
        let (manager, clock, _) = manager();
        let request = FetchRequest::get("/api/items");
        manager.put(&request, HttpResponse::new(200, "[]")).await.unwrap();

        let entry = manager.match_request(&request).await.unwrap().unwrap();
        assert_eq!(entry.cached_at, Some(1_000_000));
        assert!(manager.is_fresh(&entry));

        clock.advance(86_400 * 1000);
        assert!(!manager.is_fresh(&entry));
    }

    #[tokio::test]
    async fn test_match_searches_other_current_families() {
        let (manager, _, _) = manager();
        manager
            .put(&FetchRequest::navigate("/offline.html"), HttpResponse::new(200, "offline"))
            .await
            .unwrap();

        let sub_resource = FetchRequest::get("/offline.html");
        assert!(manager.match_request(&sub_resource).await.unwrap().is_some());
        assert_eq!(manager.offline_page().await.unwrap().unwrap().text(), "offline");
    }

    #[tokio::test]
    async fn test_old_version_stores_are_ignored() {
        let (manager, _, store) = manager();
        let request = FetchRequest::get("/partials/nav");
        let key = manager.request_key(&request);
        store
            .put("offline-runtime-v0", &key, CacheEntry::new(HttpResponse::new(200, "old"), 0))
            .await
            .unwrap();

        assert!(manager.match_request(&request).await.unwrap().is_none());
        assert_eq!(manager.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_first() {
        let mut config = Config::default();
        config.cache.max_items = 3;
        let (manager, _, _) = manager_with(config);

        for i in 0..4 {
            let request = FetchRequest::get(format!("/r/{}", i));
            manager.put(&request, HttpResponse::new(200, "x")).await.unwrap();
        }

        let name = manager.cache_name(CacheFamily::Runtime).to_string();
        let keys = manager.list_keys(&name).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert!(!keys.contains(&"GET http://localhost:8000/r/0".to_string()));
        assert_eq!(manager.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_delete_caches_not_in() {
        let (manager, _, store) = manager();
        store.open("offline-pages-v0").await.unwrap();
        store.open("unrelated").await.unwrap();
        manager.open(CacheFamily::Pages).await.unwrap();

        let deleted = manager.delete_caches_not_in(&manager.valid_names()).await.unwrap();
        assert_eq!(deleted, vec!["offline-pages-v0", "unrelated"]);
        assert_eq!(manager.cache_names().await.unwrap(), vec!["offline-pages-v1"]);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (manager, _, _) = manager();
        manager.open(CacheFamily::Pages).await.unwrap();
        manager.open(CacheFamily::Api).await.unwrap();

        assert_eq!(manager.clear_all().await.unwrap(), 2);
        assert!(manager.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eviction_skips_precached_entries() {
        let mut config = Config::default();
        config.cache.max_items = 2;
        let (manager, _, _) = manager_with(config);

        let offline = FetchRequest::get("/offline.html");
        let key = manager.request_key(&offline);
        assert!(manager.is_pinned(&key));
        manager
            .put_in(CacheFamily::Pages, &key, HttpResponse::new(200, "offline"))
            .await
            .unwrap();

        for path in ["/a", "/b", "/c"] {
            manager
                .put(&FetchRequest::navigate(path), HttpResponse::new(200, path))
                .await
                .unwrap();
        }

        let name = manager.cache_name(CacheFamily::Pages).to_string();
        let keys = manager.list_keys(&name).await.unwrap();
        assert_eq!(
            keys,
            vec![
                key.clone(),
                "GET http://localhost:8000/c".to_string()
            ]
        );
        assert_eq!(manager.offline_page().await.unwrap().unwrap().text(), "offline");
        assert_eq!(manager.stats().evictions, 2);
    }
}
