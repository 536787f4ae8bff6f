//! Cache Store Module
//!
//! Storage capability for named key/value cache stores, plus the in-memory
//! implementation used by tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{CacheEntry, InsertionOrder};
use crate::error::Result;

// == Key Value Cache Store ==
/// Named stores of `request identity -> cached response`.
///
/// Every method is one independent atomic operation. Writing into a store
/// that does not exist yet creates it.
#[async_trait]
pub trait KeyValueCacheStore: Send + Sync {
    /// Creates the named store if missing.
    async fn open(&self, cache_name: &str) -> Result<()>;

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Writes (or overwrites) an entry. An overwrite counts as a new insertion.
    async fn put(&self, cache_name: &str, key: &str, entry: CacheEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, cache_name: &str, key: &str) -> Result<bool>;

    /// Keys ordered oldest-written first.
    async fn keys(&self, cache_name: &str) -> Result<Vec<String>>;

    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Drops a whole store. Returns whether it existed.
    async fn delete_cache(&self, cache_name: &str) -> Result<bool>;
}

// == Memory Cache Store ==
#[derive(Debug, Default)]
struct NamedCache {
    entries: HashMap<String, CacheEntry>,
    order: InsertionOrder,
}

/// Process-local stores. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<BTreeMap<String, NamedCache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCacheStore for MemoryCacheStore {
    async fn open(&self, cache_name: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(cache_name.to_string())
            .or_default();
        Ok(())
    }

    async fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheEntry>> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache_name)
            .and_then(|cache| cache.entries.get(key))
            .cloned())
    }

    async fn put(&self, cache_name: &str, key: &str, entry: CacheEntry) -> Result<()> {
        let mut caches = self.caches.write().await;
        let cache = caches.entry(cache_name.to_string()).or_default();
        cache.entries.insert(key.to_string(), entry);
        cache.order.record(key);
        Ok(())
    }

    async fn delete(&self, cache_name: &str, key: &str) -> Result<bool> {
        let mut caches = self.caches.write().await;
        let Some(cache) = caches.get_mut(cache_name) else {
            return Ok(false);
        };
        cache.order.remove(key);
        Ok(cache.entries.remove(key).is_some())
    }

    async fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache_name)
            .map(|cache| cache.order.keys())
            .unwrap_or_default())
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete_cache(&self, cache_name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(cache_name).is_some())
    }
}
