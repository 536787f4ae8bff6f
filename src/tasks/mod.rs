//! Background Tasks Module
//!
//! Long-running tasks spawned by the binary.
//!
//! # Tasks
//! - Queue sync: drains the persistent queue on reconnect, on a timer and on demand
//! - Connectivity probe: polls a URL to maintain the online/offline signal

mod probe;
mod sync;

pub use probe::spawn_connectivity_probe;
pub use sync::spawn_sync_task;
