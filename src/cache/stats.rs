//! Cache Statistics Module
//!
//! Tracks lookups, writes and evictions across all cache stores.

use serde::Serialize;

// == Cache Stats ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found an entry (fresh or stale)
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Responses written
    pub writes: u64,
    /// Entries removed by the per-store budget
    pub evictions: u64,
    /// Offline page substitutions for failed navigations
    pub offline_fallbacks: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_offline_fallback(&mut self) {
        self.offline_fallbacks += 1;
    }
}
