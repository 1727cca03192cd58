//! Retry budget and exponential backoff schedule.

use std::time::Duration;

use rand::Rng;

/// Default retry budget per job.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling on any single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Bounded exponential backoff: `base * 2^retry`, capped at `max_delay`,
/// with up to 10% additive jitter to spread thundering requeues.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Whether a job that has already retried `retry_count` times has any
    /// budget left.
    pub fn budget_remaining(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Deterministic portion of the delay before retry number
    /// `retry_count` (0-based: the first retry waits `base_delay`).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// `delay_for` plus up to 10% random jitter.
    pub fn delay_with_jitter(&self, retry_count: u32) -> Duration {
        let base = self.delay_for(retry_count);
        let jitter_cap = (base.as_millis() as u64) / 10;
        if jitter_cap == 0 {
            return base;
        }
        let jitter = rand::rng().random_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_retry_until_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(6),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        // 8s exceeds the cap.
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
        assert_eq!(policy.delay_for(30), Duration::from_secs(6));
    }

    #[test]
    fn budget_is_a_strict_bound() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(policy.budget_remaining(0));
        assert!(policy.budget_remaining(2));
        assert!(!policy.budget_remaining(3));
        assert!(!policy.budget_remaining(4));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for retry in 0..4 {
            let base = policy.delay_for(retry);
            for _ in 0..32 {
                let jittered = policy.delay_with_jitter(retry);
                assert!(jittered >= base);
                assert!(jittered <= base + base.mul_f64(0.11));
            }
        }
    }
}
