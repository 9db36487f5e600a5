//! Retry backoff for unacknowledged deliveries.
//!
//! `delay(n) = base * 2^n`, computed with an integer shift. With the default
//! 500ms base, resend attempts 1, 2 and 3 wait 1s, 2s and 4s.

use std::time::Duration;

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default number of resends before a pending message is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Shift cap; keeps `1 << n` inside `u64` for any attempt number.
const MAX_SHIFT: u32 = 63;

/// Backoff delay before retry `attempt`.
#[must_use]
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(MAX_SHIFT)))
}

/// Retry parameters for one pending message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resends allowed before the entry is dropped.
    pub max_retries: u32,
    /// Base of the exponential delay.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from raw settings values.
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        retry_delay(attempt, self.base_delay)
    }

    /// Wait after resend `attempt` before the next timer fires.
    ///
    /// Doubles each step up to `delay(max_retries)`; the wait after the last
    /// resend reuses that delay before the entry expires.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.delay((attempt + 1).min(self.max_retries.max(1)))
    }

    /// Delay armed when a message first becomes pending.
    pub fn initial_delay(&self) -> Duration {
        self.delay(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}
