//! Sync Module
//!
//! Backoff policy and the coordinator that drains the persistent queue.

mod backoff;
mod coordinator;

pub use backoff::BackoffPolicy;
pub use coordinator::{DrainReport, SyncCoordinator};
