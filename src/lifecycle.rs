//! Lifecycle Controller
//!
//! Install (precache), activate (drop stale cache versions) and the page
//! control messages.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::{CacheFamily, CacheManager};
use crate::error::{OfflineError, Result};
use crate::fetch::Fetcher;
use crate::http::{FetchRequest, HttpResponse};
use crate::models::{ClientMessage, WorkerReply};
use crate::queue::PersistentQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install or activation failed; the worker never takes control
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

pub struct LifecycleController {
    cache: Arc<CacheManager>,
    fetcher: Arc<dyn Fetcher>,
    queue: PersistentQueue,
    precache: Vec<String>,
    state: RwLock<LifecycleState>,
}

impl LifecycleController {
    pub fn new(
        cache: Arc<CacheManager>,
        fetcher: Arc<dyn Fetcher>,
        queue: PersistentQueue,
        precache: Vec<String>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            queue,
            precache,
            state: RwLock::new(LifecycleState::Parsed),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        info!("Lifecycle: {}", state);
    }

    /// Marks the worker redundant and hands the error back.
    fn abort(&self, err: OfflineError) -> OfflineError {
        error!("Lifecycle step aborted: {}", err);
        self.set_state(LifecycleState::Redundant);
        err
    }

    // == Install ==
    /// Precaches every configured URL into the pages store.
    ///
    /// A pages store for the current version that already holds every
    /// precache URL is reused without touching the network, so a restart
    /// works offline. Otherwise all URLs are fetched before anything is
    /// written, so a missing resource leaves the store untouched. Any failure
    /// or non-2xx answer aborts with [`OfflineError::Config`].
    pub async fn install(&self) -> Result<()> {
        self.set_state(LifecycleState::Installing);
        self.cache
            .open(CacheFamily::Pages)
            .await
            .map_err(|e| self.abort(e))?;

        if self.precache_complete().await.map_err(|e| self.abort(e))? {
            info!("Precache already present for {}", self.cache.cache_name(CacheFamily::Pages));
            self.set_state(LifecycleState::Installed);
            return Ok(());
        }

        let mut fetched: Vec<(FetchRequest, HttpResponse)> = Vec::with_capacity(self.precache.len());
        for url in &self.precache {
            let request = FetchRequest::get(url.clone());
            match self.fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => fetched.push((request, response)),
                Ok(response) => {
                    return Err(self.abort(OfflineError::Config(format!(
                        "Precache resource {} returned {}",
                        url, response.status
                    ))))
                }
                Err(err) => {
                    return Err(self.abort(OfflineError::Config(format!(
                        "Precache resource {} unavailable: {}",
                        url, err
                    ))))
                }
            }
        }

        for (request, response) in fetched {
            let key = self.cache.request_key(&request);
            self.cache
                .put_in(CacheFamily::Pages, &key, response)
                .await
                .map_err(|e| self.abort(e))?;
        }

        info!("Precached {} resources", self.precache.len());
        self.set_state(LifecycleState::Installed);
        Ok(())
    }

    async fn precache_complete(&self) -> Result<bool> {
        let stored = self
            .cache
            .list_keys(self.cache.cache_name(CacheFamily::Pages))
            .await?;
        Ok(self.precache.iter().all(|url| {
            let key = self.cache.request_key(&FetchRequest::get(url.clone()));
            stored.contains(&key)
        }))
    }

    // == Activate ==
    /// Deletes every cache store not named for the current version, then
    /// takes control. Returns the deleted store names.
    pub async fn activate(&self) -> Result<Vec<String>> {
        match self.state() {
            LifecycleState::Installed => {}
            LifecycleState::Activated => return Ok(Vec::new()),
            other => {
                return Err(OfflineError::InvalidRequest(format!(
                    "Cannot activate from state {}",
                    other
                )))
            }
        }

        self.set_state(LifecycleState::Activating);
        let valid = self.cache.valid_names();
        let deleted = self
            .cache
            .delete_caches_not_in(&valid)
            .await
            .map_err(|e| self.abort(e))?;

        self.set_state(LifecycleState::Activated);
        info!("Controlling clients ({} stale caches removed)", deleted.len());
        Ok(deleted)
    }

    /// Force-activates an installed worker.
    pub async fn skip_waiting(&self) -> Result<()> {
        info!("Skip waiting requested");
        self.activate().await.map(|_| ())
    }

    /// Deletes every cache store unconditionally.
    pub async fn clear_all_caches(&self) -> Result<usize> {
        let removed = self.cache.clear_all().await?;
        info!("All caches cleared ({} stores)", removed);
        Ok(removed)
    }

    // == Messages ==
    pub async fn handle_message(&self, message: ClientMessage) -> WorkerReply {
        let outcome = match message {
            ClientMessage::SkipWaiting => self.skip_waiting().await.map(|_| WorkerReply::ok()),
            ClientMessage::ClearCache => self.clear_all_caches().await.map(|_| WorkerReply::ok()),
            ClientMessage::QueueRequest {
                url,
                method,
                headers,
                body,
            } => self
                .queue
                .enqueue(
                    &url,
                    &method,
                    headers,
                    body,
                    serde_json::json!({ "type": "message" }),
                )
                .await
                .map(WorkerReply::queued),
        };

        outcome.unwrap_or_else(|err| {
            warn!("Message failed: {}", err);
            WorkerReply::failed(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KeyValueCacheStore, MemoryCacheStore};
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::matcher::StrategyMatcher;
    use crate::queue::MemoryQueue;
    use crate::testing::ScriptedFetcher;

    struct Fixture {
        lifecycle: LifecycleController,
        cache: Arc<CacheManager>,
        store: Arc<MemoryCacheStore>,
        fetcher: Arc<ScriptedFetcher>,
        queue: PersistentQueue,
    }

    fn fixture(precache: &[&str]) -> Fixture {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryCacheStore::new());
        let matcher = Arc::new(StrategyMatcher::new(&config).unwrap());
        let cache = Arc::new(CacheManager::new(&config, store.clone(), clock.clone(), matcher).unwrap());
        let fetcher = Arc::new(ScriptedFetcher::new(&config.origin));
        let queue = PersistentQueue::new(Arc::new(MemoryQueue::new()), clock, EventBus::new());
        let lifecycle = LifecycleController::new(
            cache.clone(),
            fetcher.clone(),
            queue.clone(),
            precache.iter().map(|s| s.to_string()).collect(),
        );
        Fixture {
            lifecycle,
            cache,
            store,
            fetcher,
            queue,
        }
    }

    #[tokio::test]
    async fn test_install_precaches_into_pages() {
        let f = fixture(&["/offline.html", "/"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.fetcher.respond_ok("/", "home");

        f.lifecycle.install().await.unwrap();
        assert_eq!(f.lifecycle.state(), LifecycleState::Installed);

        let keys = f
            .cache
            .list_keys(f.cache.cache_name(CacheFamily::Pages))
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(f.cache.offline_page().await.unwrap().unwrap().text(), "offline");
    }

    #[tokio::test]
    async fn test_install_fails_loudly_on_missing_resource() {
        let f = fixture(&["/offline.html", "/missing"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.fetcher.respond("/missing", HttpResponse::new(404, "nope"));

        let err = f.lifecycle.install().await.unwrap_err();
        assert!(matches!(err, OfflineError::Config(_)));
        assert_eq!(f.lifecycle.state(), LifecycleState::Redundant);

        // Nothing partially written
        let keys = f
            .cache
            .list_keys(f.cache.cache_name(CacheFamily::Pages))
            .await
            .unwrap();
        assert!(keys.is_empty());
        assert!(f.lifecycle.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_activate_deletes_stale_versions() {
        let f = fixture(&["/offline.html"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.store.open("offline-pages-v0").await.unwrap();
        f.store.open("offline-api-v0").await.unwrap();

        f.lifecycle.install().await.unwrap();
        let mut deleted = f.lifecycle.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["offline-api-v0", "offline-pages-v0"]);
        assert_eq!(f.lifecycle.state(), LifecycleState::Activated);
        assert_eq!(f.store.cache_names().await.unwrap(), vec!["offline-pages-v1"]);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let f = fixture(&[]);
        assert!(f.lifecycle.activate().await.is_err());
        assert_eq!(f.lifecycle.state(), LifecycleState::Parsed);
    }

    #[tokio::test]
    async fn test_skip_waiting_message() {
        let f = fixture(&[]);
        f.lifecycle.install().await.unwrap();

        let reply = f.lifecycle.handle_message(ClientMessage::SkipWaiting).await;
        assert!(reply.success);
        assert_eq!(f.lifecycle.state(), LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_clear_cache_message() {
        let f = fixture(&["/offline.html"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.lifecycle.install().await.unwrap();

        let reply = f.lifecycle.handle_message(ClientMessage::ClearCache).await;
        assert!(reply.success);
        assert!(f.store.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_request_message() {
        let f = fixture(&[]);
        let reply = f
            .lifecycle
            .handle_message(ClientMessage::QueueRequest {
                url: "/orders".into(),
                method: "POST".into(),
                headers: Default::default(),
                body: Some("{}".into()),
            })
            .await;
        assert!(reply.success);
        let id = reply.id.unwrap();
        assert_eq!(f.queue.get(id).await.unwrap().unwrap().metadata["type"], "message");

        let reply = f
            .lifecycle
            .handle_message(ClientMessage::QueueRequest {
                url: "/orders".into(),
                method: "GET".into(),
                headers: Default::default(),
                body: None,
            })
            .await;
        assert!(!reply.success);
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn test_reinstall_reuses_stored_precache() {
        let f = fixture(&["/offline.html", "/"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.fetcher.respond_ok("/", "home");
        f.lifecycle.install().await.unwrap();

        // Origin unreachable on the next start
        f.fetcher.fail("/offline.html");
        f.fetcher.fail("/");
        let restarted = LifecycleController::new(
            f.cache.clone(),
            f.fetcher.clone(),
            f.queue.clone(),
            vec!["/offline.html".to_string(), "/".to_string()],
        );
        restarted.install().await.unwrap();
        restarted.activate().await.unwrap();

        assert_eq!(restarted.state(), LifecycleState::Activated);
        assert_eq!(f.fetcher.call_count("/offline.html"), 1);
        assert_eq!(f.cache.offline_page().await.unwrap().unwrap().text(), "offline");
    }

    #[tokio::test]
    async fn test_partial_precache_is_refetched() {
        let f = fixture(&["/offline.html", "/"]);
        f.fetcher.respond_ok("/offline.html", "offline");
        f.fetcher.respond_ok("/", "home");
        let key = f.cache.request_key(&FetchRequest::get("/offline.html"));
        f.cache
            .put_in(CacheFamily::Pages, &key, HttpResponse::new(200, "stale"))
            .await
            .unwrap();

        f.lifecycle.install().await.unwrap();
        assert_eq!(f.fetcher.call_count("/"), 1);
        assert_eq!(f.cache.offline_page().await.unwrap().unwrap().text(), "offline");
    }
}
