//! Retry and backoff policy for external commands

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::fmt;
use std::time::Duration;

/// How long to wait between attempts
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,

    /// Wait the same delay before every retry
    Fixed(Duration),

    /// Multiply the delay by `factor` after every retry, never exceeding `max`
    Exponential {
        initial: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Base delay before retry number `retry` (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let exponent = retry.saturating_sub(1) as i32;
                let secs = initial.as_secs_f64() * factor.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else if secs <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Random spread applied on top of the base delay.
///
/// Driven by a seeded generator so the same seed always yields the same
/// sequence of delays.
#[derive(Debug, Clone, PartialEq)]
pub struct Jitter {
    /// Maximum fraction of the base delay added, in `0.0..=1.0`
    pub ratio: f64,
    pub seed: u64,
}

/// When and how often a failing command is retried
#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. `0` behaves as `1`.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub jitter: Option<Jitter>,
    /// Only retry when the failed attempt's output matches
    pub retry_on: Option<Regex>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on.as_ref().map(Regex::as_str))
            .finish()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn never() -> Self {
        Self::attempts(1)
    }

    pub fn attempts(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, ratio: f64, seed: u64) -> Self {
        self.jitter = Some(Jitter {
            ratio: ratio.clamp(0.0, 1.0),
            seed,
        });
        self
    }

    pub fn retry_on(mut self, pattern: Regex) -> Self {
        self.retry_on = Some(pattern);
        self
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether a failed attempt with the given output may be retried
    pub fn should_retry(&self, attempt: u32, stdout: &str, stderr: &str) -> bool {
        if attempt >= self.total_attempts() {
            return false;
        }
        match &self.retry_on {
            Some(pattern) => pattern.is_match(stdout) || pattern.is_match(stderr),
            None => true,
        }
    }

    /// The sequence of delays this policy waits between attempts
    pub fn delays(&self) -> Delays<'_> {
        Delays {
            policy: self,
            retry: 0,
            rng: self
                .jitter
                .as_ref()
                .map(|jitter| StdRng::seed_from_u64(jitter.seed)),
        }
    }
}

/// Iterator over the waits between consecutive attempts
pub struct Delays<'a> {
    policy: &'a RetryPolicy,
    retry: u32,
    rng: Option<StdRng>,
}

impl Iterator for Delays<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry + 1 >= self.policy.total_attempts() {
            return None;
        }
        self.retry += 1;
        let base = self.policy.backoff.base_delay(self.retry);
        let delay = match (&self.policy.jitter, self.rng.as_mut()) {
            (Some(jitter), Some(rng)) if jitter.ratio > 0.0 => {
                let spread: f64 = rng.gen_range(0.0..=jitter.ratio);
                base + base.mul_f64(spread)
            }
            _ => base,
        };
        Some(delay)
    }
}

/// Blocks the run between retry attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_delays() {
        let policy = RetryPolicy::attempts(3).with_backoff(Backoff::Fixed(Duration::from_millis(100)));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let policy = RetryPolicy::attempts(5).with_backoff(Backoff::Exponential {
            initial: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_millis(500),
        });
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_exponential_backoff_never_goes_negative() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            factor: -2.0,
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.base_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(2), Duration::ZERO);
        assert_eq!(backoff.base_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        assert_eq!(RetryPolicy::never().delays().count(), 0);
        assert_eq!(RetryPolicy::attempts(0).delays().count(), 0);
        assert_eq!(RetryPolicy::attempts(0).total_attempts(), 1);
    }

    #[test]
    fn test_jitter_is_deterministic_for_a_seed() {
        let policy = RetryPolicy::attempts(4)
            .with_backoff(Backoff::Fixed(Duration::from_millis(100)))
            .with_jitter(0.5, 42);
        let first: Vec<_> = policy.delays().collect();
        let second: Vec<_> = policy.delays().collect();
        assert_eq!(first, second);
        for delay in first {
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_should_retry_respects_attempt_limit() {
        let policy = RetryPolicy::attempts(2);
        assert!(policy.should_retry(1, "", ""));
        assert!(!policy.should_retry(2, "", ""));
    }

    #[test]
    fn test_should_retry_requires_pattern_match() {
        let policy = RetryPolicy::attempts(3).retry_on(Regex::new("timed out").unwrap());
        assert!(policy.should_retry(1, "", "connection timed out"));
        assert!(!policy.should_retry(1, "compile error", ""));
    }
}
