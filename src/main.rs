//! Offline Sync - worker process
//!
//! Serves the offline engine over HTTP and keeps the request queue draining
//! in the background.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_sync::api::{create_router, AppState};
use offline_sync::config::Config;
use offline_sync::{spawn_connectivity_probe, spawn_sync_task};

/// Main entry point for the offline worker.
///
/// # Startup Sequence
/// 1. Load configuration (JSON file + environment overrides)
/// 2. Initialize tracing subscriber for logging
/// 3. Open the SQLite stores and wire the components
/// 4. Install (precache) and activate (drop stale cache versions)
/// 5. Start the queue sync task and the optional connectivity probe
/// 6. Serve the API until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    // RUST_LOG overrides the configured default
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Offline Sync worker");
    info!(
        "Configuration loaded: cache_version={}, default_strategy={}, rules={}, port={}",
        config.cache_version,
        config.default_strategy,
        config.strategies.len(),
        config.server_port
    );

    let state = AppState::from_config(&config).context("Failed to initialize stores")?;

    // A failed precache aborts startup rather than serving a partial cache
    state.lifecycle.install().await.context("Install failed")?;
    let removed = state.lifecycle.activate().await.context("Activation failed")?;
    info!("Worker active ({} stale caches removed)", removed.len());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if config.sync.enabled {
        tasks.push(spawn_sync_task(
            state.coordinator.clone(),
            Arc::new(state.connectivity.clone()),
            state.queue.sync_trigger(),
            Duration::from_millis(config.sync.poll_interval_ms),
        ));
        info!("Background sync task started (tag {})", config.sync.tag);
    }
    if let Some(probe_url) = &config.probe_url {
        tasks.push(spawn_connectivity_probe(
            state.fetcher.clone(),
            state.connectivity.clone(),
            probe_url.clone(),
            Duration::from_millis(config.probe_interval_ms),
        ));
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then aborts background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");
}
