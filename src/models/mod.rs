//! Request, response and message models for the worker API
//!
//! DTOs used for serializing/deserializing HTTP bodies and page messages.

pub mod messages;
pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use messages::{ClientMessage, WorkerReply};
pub use requests::{ConnectivityUpdate, FetchQuery};
pub use responses::{
    CacheStatsResponse, ClearFailedResponse, ErrorResponse, HealthResponse, InterceptResponse,
    StatusResponse,
};
