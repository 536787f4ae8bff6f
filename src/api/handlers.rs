//! API Handlers
//!
//! HTTP request handlers exposing the worker to pages and operators.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cache::{CacheManager, KeyValueCacheStore, MemoryCacheStore, SqliteCacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityProvider};
use crate::error::{OfflineError, Result};
use crate::events::EventBus;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::interceptor::{Interception, Interceptor, OutgoingRequest, TracingNotifier};
use crate::lifecycle::LifecycleController;
use crate::matcher::StrategyMatcher;
use crate::models::{
    ClearFailedResponse, ClientMessage, ConnectivityUpdate, FetchQuery, HealthResponse,
    InterceptResponse, StatusResponse, WorkerReply,
};
use crate::queue::{MemoryQueue, OrderedRecordQueue, PersistentQueue, QueueCounts, QueuedRequest, SqliteQueue};
use crate::strategy::StrategyEngine;
use crate::sync::{DrainReport, SyncCoordinator};

/// Database file used when `db_path` is not configured.
const DEFAULT_DB_PATH: &str = "data/offline_sync.db";

/// Response headers that must not be copied from a cached/fetched response.
const SKIPPED_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Application state shared across all handlers.
///
/// Every component is wired once here from the same configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: StrategyEngine,
    pub cache: Arc<CacheManager>,
    pub queue: PersistentQueue,
    pub coordinator: Arc<SyncCoordinator>,
    pub lifecycle: Arc<LifecycleController>,
    pub interceptor: Interceptor,
    pub connectivity: Connectivity,
    pub fetcher: Arc<dyn Fetcher>,
}

impl AppState {
    /// Wires all components over the given capabilities.
    pub fn build(
        config: Config,
        cache_store: Arc<dyn KeyValueCacheStore>,
        queue_store: Arc<dyn OrderedRecordQueue>,
        fetcher: Arc<dyn Fetcher>,
        connectivity: Connectivity,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = Arc::new(StrategyMatcher::new(&config)?);
        let cache = Arc::new(CacheManager::new(
            &config,
            cache_store,
            clock.clone(),
            matcher.clone(),
        )?);
        let engine = StrategyEngine::new(&config, cache.clone(), fetcher.clone(), matcher);

        let queue = PersistentQueue::new(queue_store, clock.clone(), EventBus::new());
        let provider: Arc<dyn ConnectivityProvider> = Arc::new(connectivity.clone());
        let coordinator = Arc::new(SyncCoordinator::new(
            &config,
            queue.clone(),
            fetcher.clone(),
            provider.clone(),
            clock,
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            cache.clone(),
            fetcher.clone(),
            queue.clone(),
            config.precache.clone(),
        ));
        let interceptor = Interceptor::new(
            queue.clone(),
            provider,
            config.origin_url()?,
            Arc::new(TracingNotifier),
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            cache,
            queue,
            coordinator,
            lifecycle,
            interceptor,
            connectivity,
            fetcher,
        })
    }

    /// Process-local stores; nothing survives a restart.
    pub fn in_memory(config: Config, fetcher: Arc<dyn Fetcher>, connectivity: Connectivity) -> Result<Self> {
        Self::build(
            config,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MemoryQueue::new()),
            fetcher,
            connectivity,
            Arc::new(SystemClock),
        )
    }

    /// Production wiring: SQLite stores, reqwest fetcher, wall clock.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let cache_store = Arc::new(SqliteCacheStore::open(&db_path)?);
        let queue_store = Arc::new(SqliteQueue::open(&db_path)?);
        let fetcher = Arc::new(HttpFetcher::new(config.origin_url()?)?);

        Self::build(
            config.clone(),
            cache_store,
            queue_store,
            fetcher,
            Connectivity::new(true),
            Arc::new(SystemClock),
        )
    }
}

/// Handler for GET /fetch
///
/// Runs the request through the strategy engine and returns the served
/// response with `x-offline-source` / `x-offline-strategy` headers.
pub async fn fetch_handler(
    State(state): State<AppState>,
    Query(query): Query<FetchQuery>,
) -> Result<Response> {
    if let Some(error_msg) = query.validate() {
        return Err(OfflineError::InvalidRequest(error_msg));
    }

    let served = state.engine.handle(query.into_request()).await?;
    let status = StatusCode::from_u16(served.response.status)
        .map_err(|e| OfflineError::Internal(format!("Invalid status: {}", e)))?;

    let mut response = Response::new(Body::from(served.response.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &served.response.headers {
        if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers.insert(
        "x-offline-source",
        HeaderValue::from_static(served.source.as_str()),
    );
    headers.insert(
        "x-offline-strategy",
        HeaderValue::from_static(served.strategy.as_str()),
    );

    Ok(response)
}

/// Handler for POST /messages
///
/// Page -> worker control channel. Failures are reported in the reply body.
pub async fn messages_handler(
    State(state): State<AppState>,
    Json(message): Json<ClientMessage>,
) -> Json<WorkerReply> {
    Json(state.lifecycle.handle_message(message).await)
}

/// Handler for POST /intercept
pub async fn intercept_handler(
    State(state): State<AppState>,
    Json(request): Json<OutgoingRequest>,
) -> Result<Json<InterceptResponse>> {
    let outcome = match state.interceptor.intercept(request).await? {
        Interception::Proceed(_) => InterceptResponse::Proceed,
        Interception::Queued { id, reply } => InterceptResponse::Queued { id, reply },
    };
    Ok(Json(outcome))
}

/// Handler for GET /queue/stats
pub async fn queue_stats_handler(State(state): State<AppState>) -> Result<Json<QueueCounts>> {
    Ok(Json(state.queue.count_by_status().await?))
}

/// Handler for GET /queue/pending
pub async fn queue_pending_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueuedRequest>>> {
    Ok(Json(state.queue.list_pending().await?))
}

/// Handler for DELETE /queue/failed
pub async fn clear_failed_handler(
    State(state): State<AppState>,
) -> Result<Json<ClearFailedResponse>> {
    let removed = state.queue.clear_failed().await?;
    Ok(Json(ClearFailedResponse::new(removed)))
}

/// Handler for POST /sync
///
/// Runs one drain pass inline and returns its report.
pub async fn sync_handler(State(state): State<AppState>) -> Result<Json<DrainReport>> {
    Ok(Json(state.coordinator.drain().await?))
}

/// Handler for GET /events
///
/// Server-sent stream of queue and sync broadcasts.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.queue.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.name())
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().comment("unserializable event"));
                    return Some((Ok::<_, Infallible>(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Handler for PUT /connectivity
///
/// Lets the host report online/offline transitions.
pub async fn connectivity_handler(
    State(state): State<AppState>,
    Json(update): Json<ConnectivityUpdate>,
) -> impl IntoResponse {
    let changed = state.connectivity.set_online(update.online);
    Json(serde_json::json!({
        "online": state.connectivity.is_online(),
        "changed": changed,
    }))
}

/// Handler for GET /status
pub async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let config = &state.config;
    Ok(Json(StatusResponse {
        enabled: config.enabled,
        cache_version: config.cache_version,
        default_strategy: config.default_strategy,
        strategies: config.strategies.clone(),
        online: state.connectivity.is_online(),
        lifecycle: state.lifecycle.state(),
        caches: state.cache.cache_names().await?,
        cache: state.cache.stats().into(),
        queue: state.queue.count_by_status().await?,
    }))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
