//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::constants::{BACKOFF_BASE_MS, BACKOFF_CAP_MS, BACKOFF_JITTER_MS, DEFAULT_MAX_RETRIES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per page, including the first.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniform random jitter.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base: Duration::from_millis(BACKOFF_BASE_MS),
            cap: Duration::from_millis(BACKOFF_CAP_MS),
            jitter: Duration::from_millis(BACKOFF_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), without jitter:
    /// `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.cap)
    }

    /// Delay before retry number `attempt`. A server-provided `Retry-After`
    /// replaces the computed backoff.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.backoff(attempt) + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.backoff(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 8_000]);
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(2, None);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }
}
