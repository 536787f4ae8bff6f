//! API Module
//!
//! HTTP handlers and routing exposing the worker: strategy-served fetches,
//! the page message channel, queue inspection, sync control and an event
//! stream.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
