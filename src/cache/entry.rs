//! Cache Entry Module
//!
//! A stored response together with the timestamp that drives freshness.

use crate::http::HttpResponse;

// == Cache Entry ==
/// Represents a single cached response with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The stored response
    pub response: HttpResponse,
    /// Write timestamp (Unix milliseconds). `None` for entries written
    /// without metadata, which are treated as always fresh.
    pub cached_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with `now_ms`.
    pub fn new(response: HttpResponse, now_ms: u64) -> Self {
        Self {
            response,
            cached_at: Some(now_ms),
        }
    }

    /// Creates an entry with no timestamp.
    pub fn unstamped(response: HttpResponse) -> Self {
        Self {
            response,
            cached_at: None,
        }
    }

    // == Is Fresh ==
    /// Checks the entry against a freshness window.
    ///
    /// Boundary condition: the entry stops being fresh once exactly
    /// `max_age_secs` seconds have elapsed since it was written.
    ///
    /// # Returns
    /// - `true` if there is no `cached_at`, or `now - cached_at < max_age`
    /// - `false` otherwise
    pub fn is_fresh_at(&self, now_ms: u64, max_age_secs: u64) -> bool {
        match self.cached_at {
            Some(cached_at) => {
                now_ms.saturating_sub(cached_at) < max_age_secs.saturating_mul(1000)
            }
            None => true,
        }
    }

    /// Age in milliseconds, or None if the entry is unstamped.
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.cached_at.map(|t| now_ms.saturating_sub(t))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(t: u64) -> CacheEntry {
        CacheEntry::new(HttpResponse::new(200, "body"), t)
    }

    #[test]
    fn test_fresh_inside_window() {
        let entry = entry_at(10_000);
        assert!(entry.is_fresh_at(10_000, 60));
        assert!(entry.is_fresh_at(69_999, 60));
    }

    #[test]
    fn test_freshness_boundary_seconds() {
        // Written at T, max age A: fresh at T + A - 1, stale at T + A + 1
        let t = 1_700_000_000_000;
        let a = 300;
        let entry = entry_at(t);
        assert!(entry.is_fresh_at(t + (a - 1) * 1000, a));
        assert!(!entry.is_fresh_at(t + (a + 1) * 1000, a));
    }

    #[test]
    fn test_expiry_exactly_at_max_age() {
        let entry = entry_at(0);
        assert!(!entry.is_fresh_at(60_000, 60));
    }

    #[test]
    fn test_unstamped_entry_is_always_fresh() {
        let entry = CacheEntry::unstamped(HttpResponse::new(200, "x"));
        assert!(entry.is_fresh_at(u64::MAX, 1));
        assert!(entry.age_ms(5).is_none());
    }

    #[test]
    fn test_clock_behind_write_time_counts_as_fresh() {
        let entry = entry_at(5_000);
        assert!(entry.is_fresh_at(1_000, 1));
        assert_eq!(entry.age_ms(1_000), Some(0));
    }
}
