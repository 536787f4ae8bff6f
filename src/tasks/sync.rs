//! Queue Sync Task
//!
//! Background task that drains the persistent queue whenever connectivity
//! returns, on a fixed interval, and whenever it is explicitly poked.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::connectivity::ConnectivityProvider;
use crate::sync::SyncCoordinator;

/// Spawns the drain loop.
///
/// # Arguments
/// * `coordinator` - shared sync coordinator
/// * `connectivity` - a drain runs on every offline -> online transition
/// * `trigger` - explicit sync requests (enqueue, `POST /sync`)
/// * `poll_interval` - periodic drain; the first tick fires immediately
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during graceful shutdown.
pub fn spawn_sync_task(
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn ConnectivityProvider>,
    trigger: Arc<Notify>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting queue sync task with interval of {}ms",
            poll_interval.as_millis()
        );

        let mut online = connectivity.subscribe();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                _ = ticker.tick() => "periodic",
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                    "connectivity restored"
                }
                _ = trigger.notified() => "explicit",
            };

            debug!("Sync triggered ({})", reason);
            match coordinator.drain().await {
                Ok(report) if report.ran && report.attempted > 0 => info!(
                    "Sync pass: {} synced, {} failed, {} pending",
                    report.synced, report.failed, report.remaining_pending
                ),
                Ok(_) => {}
                Err(err) => error!("Sync pass failed: {}", err),
            }
        }

        info!("Queue sync task stopped");
    })
}
