//! Exponential backoff between replay attempts of one queue entry.

use rand::Rng;

use crate::config::SyncSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_ms,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            settings.retry_interval_ms,
            settings.max_backoff_ms,
            settings.jitter_ms,
        )
    }

    /// `min(base * 2^retries, max)`, saturating on overflow.
    pub fn base_delay_ms(&self, retries: u32) -> u64 {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Base delay plus a random jitter in `[0, jitter_ms)`.
    pub fn delay_ms<R: Rng + ?Sized>(&self, retries: u32, rng: &mut R) -> u64 {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.jitter_ms)
        };
        self.base_delay_ms(retries).saturating_add(jitter)
    }

    /// Whether an entry last tried at `last_attempt` may run again at `now`.
    pub fn is_due(last_attempt: Option<u64>, now_ms: u64, delay_ms: u64) -> bool {
        match last_attempt {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= delay_ms,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}
