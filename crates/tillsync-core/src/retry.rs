//! Retry backoff policy for failed queue items
//!
//! Delay grows exponentially with the attempt count and is capped; the
//! policy gives up deterministically at the item's attempt bound so a
//! poison item becomes visible to an operator instead of consuming batch
//! slots forever. No jitter: retries on a single device queue do not
//! thunder.

/// Computes retry eligibility for failed items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on the backoff delay, in seconds
    cap_secs: i64,
}

/// Default delay cap: 15 minutes
pub const DEFAULT_BACKOFF_CAP_SECS: i64 = 15 * 60;

impl RetryPolicy {
    /// Create a policy with the given delay cap in seconds
    #[must_use]
    pub const fn new(cap_secs: i64) -> Self {
        Self { cap_secs }
    }

    /// Backoff delay after the given number of attempts:
    /// `min(2^attempts seconds, cap)`
    #[must_use]
    pub fn delay_secs(&self, attempts: u32) -> i64 {
        // 2^63 overflows i64; past 62 the cap has long since won anyway
        let exponent = attempts.min(62);
        let raw = 1_i64 << exponent;
        raw.min(self.cap_secs)
    }

    /// Earliest time (Unix ms) a retry may be attempted after the given
    /// number of attempts, relative to `now_ms`
    #[must_use]
    pub fn next_eligible(&self, attempts: u32, now_ms: i64) -> i64 {
        now_ms + self.delay_secs(attempts) * 1000
    }

    /// Whether retrying should stop for good
    #[must_use]
    pub const fn should_give_up(attempts: u32, max_attempts: u32) -> bool {
        attempts >= max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_CAP_SECS)
    }
}
