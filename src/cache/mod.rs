//! Cache Module
//!
//! Named, versioned stores of cached responses with freshness tracking and
//! FIFO eviction.

mod entry;
mod manager;
mod order;
mod sqlite;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use manager::{CacheFamily, CacheManager};
pub use order::InsertionOrder;
pub use sqlite::SqliteCacheStore;
pub use stats::CacheStats;
pub use store::{KeyValueCacheStore, MemoryCacheStore};
