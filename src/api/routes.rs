//! API Routes
//!
//! Configures the Axum router with all worker endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_failed_handler, connectivity_handler, events_handler, fetch_handler, health_handler,
    intercept_handler, messages_handler, queue_pending_handler, queue_stats_handler,
    status_handler, sync_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /fetch?url=&mode=` - Serve a GET through the strategy engine
/// - `POST /messages` - Page control messages
/// - `POST /intercept` - Queue-or-proceed decision for a mutating request
/// - `GET /queue/stats` - Queue counts by status
/// - `GET /queue/pending` - Pending entries in replay order
/// - `DELETE /queue/failed` - Clear terminally failed entries
/// - `POST /sync` - Run a drain pass now
/// - `GET /events` - Server-sent queue/sync events
/// - `PUT /connectivity` - Report online/offline
/// - `GET /status` - Configuration, cache and queue summary
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/fetch", get(fetch_handler))
        .route("/messages", post(messages_handler))
        .route("/intercept", post(intercept_handler))
        .route("/queue/stats", get(queue_stats_handler))
        .route("/queue/pending", get(queue_pending_handler))
        .route("/queue/failed", delete(clear_failed_handler))
        .route("/sync", post(sync_handler))
        .route("/events", get(events_handler))
        .route("/connectivity", put(connectivity_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
