//! Exponential backoff for retrying failed accepts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Highest exponent applied to the base delay
const MAX_EXPONENT: u32 = 10;

/// Delay for the given 0-indexed attempt: `base * 2^attempt`, capped at `max`.
///
/// ```
/// use ssp::utils::backoff::exponential_backoff;
/// use std::time::Duration;
///
/// assert_eq!(exponential_backoff(0, 100, 5000), Duration::from_millis(100));
/// assert_eq!(exponential_backoff(3, 100, 5000), Duration::from_millis(800));
/// assert_eq!(exponential_backoff(9, 100, 5000), Duration::from_millis(5000));
/// ```
pub fn exponential_backoff(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let delay_ms = base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt.min(MAX_EXPONENT)))
        .min(max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Consecutive-failure counter producing growing delays.
///
/// The accept loop calls [`next_delay`](Self::next_delay) after each error
/// and [`reset`](Self::reset) after each success.
#[derive(Debug)]
pub struct BackoffCounter {
    counter: AtomicU32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl BackoffCounter {
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            counter: AtomicU32::new(0),
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn next_delay(&self) -> Duration {
        let attempt = self
            .counter
            .fetch_add(1, Ordering::Relaxed)
            .min(MAX_EXPONENT);
        exponential_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }

    /// Failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}
