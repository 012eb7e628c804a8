//! # Exponential Failure Backoff
//!
//! Per-item exponential backoff used by [`crate::WorkQueue::add_rate_limited`].
//!
//! Every consecutive failure of the same key doubles the delay before the key
//! is handed out again: `base * 2^failures`, capped at `max`. A successful
//! reconciliation calls [`ItemRateLimiter::forget`], which restarts the
//! sequence for that key.
//!
//! Default sequence: 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay for the first retry of an item.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default ceiling for the retry delay of an item.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Stateless: computes the delay for a given number of consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay for the first failure
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base and maximum delays.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Calculate the backoff duration for a given failure count (0-indexed).
    ///
    /// The sequence is `base`, `base*2`, `base*4`, ... capped at `max`.
    /// Large counts saturate at `max` instead of overflowing.
    #[must_use]
    pub fn calculate_for_failure_count(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        match self.base.checked_mul(factor) {
            Some(delay) => std::cmp::min(delay, self.max),
            None => self.max,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Per-item failure tracking on top of [`ExponentialBackoff`].
#[derive(Debug, Clone)]
pub struct ItemRateLimiter<K> {
    backoff: ExponentialBackoff,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemRateLimiter<K> {
    /// Create a limiter using the given backoff curve.
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Record one more failure for `key` and return how long to wait before retrying it.
    pub fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.calculate_for_failure_count(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of times `key` has been rate limited since the last [`forget`](Self::forget).
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure history for `key`.
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }
}

impl<K: Eq + Hash + Clone> Default for ItemRateLimiter<K> {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
