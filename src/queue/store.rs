//! Queue storage capability and its in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{OfflineError, Result};
use crate::queue::{NewQueuedRequest, QueueCounts, QueueStatus, QueueUpdate, QueuedRequest};

// == Ordered Record Queue ==
/// Durable ordered collection of queue records keyed by auto-increment id.
///
/// Each call is atomic on its own; `update` is a single-entry
/// read-modify-write transaction.
#[async_trait]
pub trait OrderedRecordQueue: Send + Sync {
    /// Stores a new pending record and returns its id.
    async fn insert(&self, request: NewQueuedRequest) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<QueuedRequest>>;

    /// Records with `status`, ascending id.
    async fn list(&self, status: QueueStatus) -> Result<Vec<QueuedRequest>>;

    /// Applies `update` and returns the stored result.
    ///
    /// Fails with [`OfflineError::QueueEntryNotFound`] if the id is gone.
    async fn update(&self, id: i64, update: QueueUpdate) -> Result<QueuedRequest>;

    async fn remove(&self, id: i64) -> Result<bool>;

    async fn counts(&self) -> Result<QueueCounts>;

    /// Deletes every record with `status`. Returns the removed ids, ascending.
    async fn remove_with_status(&self, status: QueueStatus) -> Result<Vec<i64>>;
}

// == Memory Queue ==
#[derive(Debug, Default)]
struct MemoryQueueInner {
    next_id: i64,
    records: BTreeMap<i64, QueuedRequest>,
}

/// Process-local queue. Ids are never reused within one instance.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<MemoryQueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderedRecordQueue for MemoryQueue {
    async fn insert(&self, request: NewQueuedRequest) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.records.insert(id, request.into_record(id));
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<QueuedRequest>> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn list(&self, status: QueueStatus) -> Result<Vec<QueuedRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn update(&self, id: i64, update: QueueUpdate) -> Result<QueuedRequest> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(OfflineError::QueueEntryNotFound(id))?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        Ok(self.inner.lock().await.records.remove(&id).is_some())
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let inner = self.inner.lock().await;
        let pending = inner
            .records
            .values()
            .filter(|r| r.status == QueueStatus::Pending)
            .count();
        Ok(QueueCounts {
            total: inner.records.len(),
            pending,
            failed: inner.records.len() - pending,
        })
    }

    async fn remove_with_status(&self, status: QueueStatus) -> Result<Vec<i64>> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<i64> = inner
            .records
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.id)
            .collect();
        for id in &ids {
            inner.records.remove(id);
        }
        Ok(ids)
    }
}
