//! Backoff policy for transient store conflicts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail on first conflict)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) spreading contending writers apart
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(5), Duration::from_millis(200))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-indexed). Never exceeds `max_delay`.
    /// Callers contending for the same lock get independent jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi(retry.saturating_sub(1).min(62) as i32),
            BackoffStrategy::Linear => base_ms * retry as f64,
        }
        .min(max_ms);

        // Uniform in [-jitter, +jitter] of the delay, drawn per call.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_doubles_then_caps() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(5), Duration::from_millis(200))
            .with_jitter(0.0);
        let delays: Vec<u64> = (1..=8)
            .map(|r| policy.delay_for_retry(r).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 200, 200]);
    }

    #[test]
    fn jitter_stays_within_cap() {
        let policy = RetryPolicy::default();
        for retry in 1..=50 {
            assert!(policy.delay_for_retry(retry) <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_varies_between_calls_within_band() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(10_000))
            .with_jitter(0.5);
        // Retry 3 without jitter is 400ms.
        let delays: Vec<Duration> = (0..64).map(|_| policy.delay_for_retry(3)).collect();
        for delay in &delays {
            assert!(*delay >= Duration::from_millis(200) && *delay <= Duration::from_millis(600), "{delay:?}");
        }
        assert!(
            delays.iter().any(|d| *d != delays[0]),
            "64 draws produced the same delay"
        );
    }

    #[test]
    fn contending_callers_do_not_retry_in_lockstep() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(10_000))
            .with_jitter(0.5);
        let schedules: Vec<Vec<Duration>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (1..=4).map(|r| policy.delay_for_retry(r)).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(schedules.iter().any(|s| *s != schedules[0]));
    }

    #[test]
    fn huge_retry_numbers_do_not_overflow() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_millis(200));
    }

    #[test]
    fn fixed_and_linear() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(7));
        assert_eq!(fixed.delay_for_retry(1), Duration::from_millis(7));
        assert_eq!(fixed.delay_for_retry(3), Duration::from_millis(7));

        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(linear.delay_for_retry(3), Duration::from_millis(15));
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            base_ms in 0u64..1_000,
            extra_ms in 0u64..10_000,
            retry in 0u32..200,
            jitter in 0.0f64..1.0,
        ) {
            let policy = RetryPolicy::exponential(
                10,
                Duration::from_millis(base_ms),
                Duration::from_millis(base_ms + extra_ms),
            )
            .with_jitter(jitter);
            prop_assert!(policy.delay_for_retry(retry) <= policy.max_delay);
        }
    }
}
