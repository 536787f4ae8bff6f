//! Persistent Request Queue
//!
//! Durable FIFO of deferred mutating requests. [`PersistentQueue`] is the only
//! writer of queue records; it validates input, stamps timestamps and
//! broadcasts a [`SyncEvent::QueueUpdated`] for every change.

mod record;
mod sqlite;
mod store;

use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{OfflineError, Result};
use crate::events::{EventBus, QueueAction, SyncEvent};
use crate::http::{is_mutating, Headers};

pub use record::{NewQueuedRequest, QueueCounts, QueueStatus, QueueUpdate, QueuedRequest};
pub use sqlite::SqliteQueue;
pub use store::{MemoryQueue, OrderedRecordQueue};

// == Persistent Queue ==
#[derive(Clone)]
pub struct PersistentQueue {
    store: Arc<dyn OrderedRecordQueue>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Poked on every enqueue so an online worker drains right away
    trigger: Arc<Notify>,
}

impl PersistentQueue {
    pub fn new(store: Arc<dyn OrderedRecordQueue>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Adds a pending request and returns its id.
    ///
    /// # Arguments
    /// * `method` - must be POST, PUT, PATCH or DELETE
    /// * `metadata` - free-form origin tag kept with the record
    ///
    /// # Returns
    /// * `Err(OfflineError::InvalidRequest)` for a non-mutating verb or empty URL
    /// * `Err(OfflineError::Storage | QuotaExceeded)` when the write fails
    pub async fn enqueue(
        &self,
        url: &str,
        method: &str,
        headers: Headers,
        body: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        if !is_mutating(method) {
            return Err(OfflineError::InvalidRequest(format!(
                "Only POST, PUT, PATCH and DELETE can be queued, got {}",
                method
            )));
        }
        if url.trim().is_empty() {
            return Err(OfflineError::InvalidRequest("Queued request needs a URL".to_string()));
        }

        let id = self
            .store
            .insert(NewQueuedRequest {
                url: url.to_string(),
                method: method.to_ascii_uppercase(),
                headers,
                body,
                metadata,
                created_at: self.clock.now_ms(),
            })
            .await?;

        info!("Request queued: {} {} (id {})", method.to_ascii_uppercase(), url, id);
        self.events.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Added,
            id,
        });
        self.trigger.notify_one();
        Ok(id)
    }

    /// Pending records in replay order (ascending id).
    pub async fn list_pending(&self) -> Result<Vec<QueuedRequest>> {
        self.store.list(QueueStatus::Pending).await
    }

    pub async fn list_failed(&self) -> Result<Vec<QueuedRequest>> {
        self.store.list(QueueStatus::Failed).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueuedRequest>> {
        self.store.get(id).await
    }

    pub async fn update(&self, id: i64, update: QueueUpdate) -> Result<QueuedRequest> {
        let record = self.store.update(id, update).await?;
        debug!("Queue record {} updated: {} retries={}", id, record.status, record.retries);
        self.events.emit(SyncEvent::QueueUpdated {
            action: QueueAction::Updated,
            id,
        });
        Ok(record)
    }

    pub async fn remove(&self, id: i64) -> Result<bool> {
        let removed = self.store.remove(id).await?;
        if removed {
            self.events.emit(SyncEvent::QueueUpdated {
                action: QueueAction::Removed,
                id,
            });
        }
        Ok(removed)
    }

    pub async fn count_by_status(&self) -> Result<QueueCounts> {
        self.store.counts().await
    }

    /// Drops every terminally failed record. Returns how many were removed.
    pub async fn clear_failed(&self) -> Result<usize> {
        let removed = self.store.remove_with_status(QueueStatus::Failed).await?;
        if !removed.is_empty() {
            info!("Cleared {} failed requests", removed.len());
        }
        for &id in &removed {
            self.events.emit(SyncEvent::QueueUpdated {
                action: QueueAction::Removed,
                id,
            });
        }
        Ok(removed.len())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Signal fired on every enqueue.
    pub fn sync_trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue() -> PersistentQueue {
        PersistentQueue::new(
            Arc::new(MemoryQueue::new()),
            Arc::new(ManualClock::new(500)),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_record() {
        let queue = queue();
        let id = queue
            .enqueue(
                "/orders",
                "post",
                Headers::new(),
                Some("{}".into()),
                serde_json::json!({"type": "fetch-api"}),
            )
            .await
            .unwrap();

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.method, "POST");
        assert_eq!(record.status, QueueStatus::Pending);
        assert_eq!(record.retries, 0);
        assert_eq!(record.created_at, 500);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_get() {
        let queue = queue();
        let err = queue
            .enqueue("/orders", "GET", Headers::new(), None, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::InvalidRequest(_)));
        assert_eq!(queue.count_by_status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let queue = queue();
        let mut rx = queue.subscribe();

        let id = queue
            .enqueue("/a", "DELETE", Headers::new(), None, serde_json::Value::Null)
            .await
            .unwrap();
        queue.update(id, QueueUpdate::default()).await.unwrap();
        queue.remove(id).await.unwrap();

        for expected in [QueueAction::Added, QueueAction::Updated, QueueAction::Removed] {
            assert_eq!(
                rx.recv().await.unwrap(),
                SyncEvent::QueueUpdated {
                    action: expected,
                    id
                }
            );
        }
    }

    #[tokio::test]
    async fn test_enqueue_pokes_trigger() {
        let queue = queue();
        let trigger = queue.sync_trigger();
        queue
            .enqueue("/a", "PUT", Headers::new(), None, serde_json::Value::Null)
            .await
            .unwrap();

        // notify_one stores a permit, so this resolves immediately
        tokio::time::timeout(std::time::Duration::from_millis(50), trigger.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_failed_keeps_pending() {
        let queue = queue();
        let a = queue
            .enqueue("/a", "POST", Headers::new(), None, serde_json::Value::Null)
            .await
            .unwrap();
        queue
            .enqueue("/b", "POST", Headers::new(), None, serde_json::Value::Null)
            .await
            .unwrap();
        queue
            .update(
                a,
                QueueUpdate {
                    status: Some(QueueStatus::Failed),
                    ..QueueUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(queue.clear_failed().await.unwrap(), 1);
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "/b");
    }

    #[tokio::test]
    async fn test_clear_failed_broadcasts_each_removal() {
        let queue = queue();
        let mut ids = Vec::new();
        for url in ["/a", "/b", "/c"] {
            let id = queue
                .enqueue(url, "POST", Headers::new(), None, serde_json::Value::Null)
                .await
                .unwrap();
            ids.push(id);
        }
        for &id in &ids[..2] {
            queue
                .update(
                    id,
                    QueueUpdate {
                        status: Some(QueueStatus::Failed),
                        ..QueueUpdate::default()
                    },
                )
                .await
                .unwrap();
        }

        let mut rx = queue.subscribe();
        assert_eq!(queue.clear_failed().await.unwrap(), 2);

        for &id in &ids[..2] {
            assert_eq!(
                rx.try_recv().unwrap(),
                SyncEvent::QueueUpdated {
                    action: QueueAction::Removed,
                    id
                }
            );
        }
        assert!(rx.try_recv().is_err());
    }
}
