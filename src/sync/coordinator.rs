//! Sync Coordinator
//!
//! Replays pending queue entries against the network, one at a time in
//! ascending id order, applying backoff and the retry limit per entry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::connectivity::ConnectivityProvider;
use crate::error::{OfflineError, Result};
use crate::events::{SyncEvent, SyncResult};
use crate::fetch::Fetcher;
use crate::queue::{PersistentQueue, QueueStatus, QueueUpdate, QueuedRequest};
use crate::sync::BackoffPolicy;

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    /// False when the pass was a no-op (offline or another pass running)
    pub ran: bool,
    pub attempted: usize,
    pub synced: usize,
    /// Entries still inside their backoff window
    pub skipped: usize,
    /// Attempts that ended without a 2xx response
    pub failed: usize,
    pub permanently_failed: usize,
    pub remaining_pending: usize,
    pub results: Vec<SyncResult>,
}

pub struct SyncCoordinator {
    queue: PersistentQueue,
    fetcher: Arc<dyn Fetcher>,
    connectivity: Arc<dyn ConnectivityProvider>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    max_retries: u32,
    inter_entry_delay: Duration,
    /// Held for the duration of a pass; overlapping triggers are dropped
    draining: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        config: &Config,
        queue: PersistentQueue,
        fetcher: Arc<dyn Fetcher>,
        connectivity: Arc<dyn ConnectivityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            fetcher,
            connectivity,
            clock,
            backoff: BackoffPolicy::from_settings(&config.sync),
            max_retries: config.sync.max_retries,
            inter_entry_delay: Duration::from_millis(config.sync.inter_entry_delay_ms),
            draining: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &PersistentQueue {
        &self.queue
    }

    // == Drain ==
    /// Runs one pass over the pending entries.
    ///
    /// No-op while offline or while another pass is in progress. A pass stops
    /// early if connectivity drops between two replays.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain");
            return Ok(report);
        }
        let Ok(_guard) = self.draining.try_lock() else {
            debug!("Drain already in progress");
            return Ok(report);
        };
        report.ran = true;

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            return Ok(report);
        }
        info!("Draining {} queued requests", pending.len());

        for entry in pending {
            if !self.connectivity.is_online() {
                info!("Connectivity lost, stopping drain");
                break;
            }

            let now = self.clock.now_ms();
            let delay = self.backoff.delay_ms(entry.retries, &mut rand::thread_rng());
            if !BackoffPolicy::is_due(entry.last_attempt, now, delay) {
                debug!("Request {} backing off for {}ms", entry.id, delay);
                report.skipped += 1;
                continue;
            }

            if report.attempted > 0 && !self.inter_entry_delay.is_zero() {
                tokio::time::sleep(self.inter_entry_delay).await;
            }
            report.attempted += 1;

            let Some(result) = self.replay(entry).await? else {
                continue;
            };
            if result.success {
                report.synced += 1;
            } else {
                report.failed += 1;
                if result.request.status == QueueStatus::Failed {
                    report.permanently_failed += 1;
                }
            }
            report.results.push(result);
        }

        report.remaining_pending = self.queue.count_by_status().await?.pending;
        let events = self.queue.events();
        if report.remaining_pending == 0 {
            info!("Queue empty");
            events.emit(SyncEvent::QueueEmpty);
        }
        if !report.results.is_empty() {
            events.emit(SyncEvent::SyncComplete {
                results: report.results.clone(),
            });
        }
        info!(
            "Drain finished: {} synced, {} failed, {} skipped, {} pending",
            report.synced, report.failed, report.skipped, report.remaining_pending
        );
        Ok(report)
    }

    /// Marks the attempt, replays, and records the outcome.
    ///
    /// Returns `None` when the entry disappeared before the attempt.
    async fn replay(&self, entry: QueuedRequest) -> Result<Option<SyncResult>> {
        let id = entry.id;
        let attempt = QueueUpdate {
            retries: Some(entry.retries + 1),
            last_attempt: Some(self.clock.now_ms()),
            ..QueueUpdate::default()
        };
        let entry = match self.queue.update(id, attempt).await {
            Ok(entry) => entry,
            Err(OfflineError::QueueEntryNotFound(_)) => {
                debug!("Request {} removed before replay", id);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        debug!("Replaying {} {} (attempt {})", entry.method, entry.url, entry.retries);
        let events = self.queue.events();

        match self.fetcher.fetch(&entry.to_fetch_request()).await {
            Ok(response) if response.is_success() => {
                self.queue.remove(id).await?;
                info!("Synced {} {} -> {}", entry.method, entry.url, response.status);
                events.emit(SyncEvent::Synced {
                    request: entry.clone(),
                    response: response.clone(),
                });
                Ok(Some(SyncResult {
                    success: true,
                    request: entry,
                    response: Some(response),
                    error: None,
                }))
            }
            Ok(response) => {
                // Origin errors never count toward the retry limit
                let message = format!("{} {}", response.status, response.status_text);
                warn!("Replay of {} rejected by origin: {}", entry.url, message);
                let entry = self
                    .queue
                    .update(
                        id,
                        QueueUpdate {
                            status: Some(QueueStatus::Pending),
                            last_error: Some(message.clone()),
                            ..QueueUpdate::default()
                        },
                    )
                    .await?;
                Ok(Some(SyncResult {
                    success: false,
                    request: entry,
                    response: Some(response),
                    error: Some(message),
                }))
            }
            Err(err) => {
                let message = err.to_string();
                let terminal = entry.retries >= self.max_retries;
                let entry = self
                    .queue
                    .update(
                        id,
                        QueueUpdate {
                            status: terminal.then_some(QueueStatus::Failed),
                            last_error: Some(message.clone()),
                            ..QueueUpdate::default()
                        },
                    )
                    .await?;

                if terminal {
                    error!(
                        "Request {} permanently failed after {} attempts: {}",
                        id, entry.retries, message
                    );
                    events.emit(SyncEvent::PermanentlyFailed {
                        request: entry.clone(),
                        error: message.clone(),
                    });
                } else {
                    warn!("Replay of {} failed (attempt {}): {}", entry.url, entry.retries, message);
                }
                Ok(Some(SyncResult {
                    success: false,
                    request: entry,
                    response: None,
                    error: Some(message),
                }))
            }
        }
    }
}
