//! Offline Sync - An offline-resilience engine for web applications
//!
//! Routes GET requests through caching strategies with freshness and eviction
//! control, and durably queues mutating requests made while offline for
//! replay with exponential backoff once connectivity returns.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod fetch;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod matcher;
pub mod models;
pub mod queue;
pub mod strategy;
pub mod sync;
pub mod tasks;
pub mod testing;

pub use api::AppState;
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityProvider};
pub use error::{OfflineError, Result};
pub use events::{SyncEvent, SyncResult};
pub use interceptor::{Interception, Interceptor, OutgoingRequest, RequestOrigin};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use matcher::resolve_strategy;
pub use queue::{PersistentQueue, QueuedRequest, QueueStatus};
pub use strategy::{ResponseSource, Served, StrategyEngine};
pub use sync::{DrainReport, SyncCoordinator};
pub use tasks::{spawn_connectivity_probe, spawn_sync_task};
