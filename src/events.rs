//! Events broadcast to page clients.
//!
//! Delivery is fire-and-forget: emitting with no subscriber is not an error,
//! and a lagging subscriber loses the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::http::HttpResponse;
use crate::queue::QueuedRequest;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Added,
    Updated,
    Removed,
}

/// Outcome of one replay attempt, reported in [`SyncEvent::SyncComplete`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub request: QueuedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    QueueUpdated { action: QueueAction, id: i64 },
    Synced {
        request: QueuedRequest,
        response: HttpResponse,
    },
    PermanentlyFailed { request: QueuedRequest, error: String },
    QueueEmpty,
    #[serde(rename = "SYNC_COMPLETE")]
    SyncComplete { results: Vec<SyncResult> },
}

impl SyncEvent {
    /// Wire name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::QueueUpdated { .. } => "queue-updated",
            SyncEvent::Synced { .. } => "synced",
            SyncEvent::PermanentlyFailed { .. } => "permanently-failed",
            SyncEvent::QueueEmpty => "queue-empty",
            SyncEvent::SyncComplete { .. } => "SYNC_COMPLETE",
        }
    }
}

// == Event Bus ==
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SyncEvent) {
        trace!("Emitting {}", event.name());
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
