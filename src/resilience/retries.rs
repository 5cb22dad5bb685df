//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (configured set of failure kinds)
//! - Execute retries with exponential backoff + jitter
//! - Surface the last failure once the retry budget is spent
//!
//! # Design Decisions
//! - Total attempts = max_retries + 1
//! - Non-retryable failures propagate immediately, unwrapped
//! - The backoff wait blocks the calling thread and holds no lock

use std::thread;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, FailureKind, Result};
use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, calculate_backoff};

/// Retry configuration bound to a call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub retryable: Vec<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            retryable: config.retry_on.clone(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial: Duration, factor: f64, max: Duration) -> Self {
        self.initial_delay = initial;
        self.backoff_factor = factor;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        self.retryable.contains(&error.kind())
    }

    /// Delay before the retry following failed attempt `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial_delay, self.backoff_factor, self.max_delay)
    }

    /// Delay actually waited before the next retry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }
}

/// Runs a fallible operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `f` until it succeeds, fails with a non-retryable error, or the budget is spent.
    ///
    /// A spent budget yields [`Error::RetriesExhausted`] wrapping the last failure.
    pub fn run<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let total_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            let error = match f() {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(operation, attempt = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.policy.is_retryable(&error) {
                tracing::debug!(operation, error = %error, kind = %error.kind(), "Non-retryable failure");
                return Err(error);
            }

            if attempt >= self.policy.max_retries {
                tracing::error!(
                    operation,
                    attempts = total_attempts,
                    error = %error,
                    "Operation failed after all retries"
                );
                metrics::record_retries_exhausted(operation);
                return Err(Error::RetriesExhausted {
                    attempts: total_attempts,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = total_attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            );
            metrics::record_retry(operation, attempt + 1);

            thread::sleep(delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(1), 2.0, Duration::from_millis(5))
            .with_jitter(false)
    }

    #[test]
    fn test_succeeds_immediately() {
        let executor = RetryExecutor::new(fast_policy(3));
        let mut calls = 0;
        let result = executor.run("op", || {
            calls += 1;
            Ok::<_, Error>("data")
        });
        assert_eq!(result.unwrap(), "data");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_succeeds_after_failures() {
        for k in 0..3 {
            let executor = RetryExecutor::new(fast_policy(3));
            let mut calls = 0;
            let result = executor.run("op", || {
                calls += 1;
                if calls <= k {
                    Err(Error::transient("connection reset"))
                } else {
                    Ok(calls)
                }
            });
            assert_eq!(result.unwrap(), k + 1);
            assert_eq!(calls, k + 1);
        }
    }

    #[test]
    fn test_exhausts_budget() {
        let executor = RetryExecutor::new(fast_policy(3));
        let mut calls = 0;
        let result: Result<()> = executor.run("op", || {
            calls += 1;
            Err(Error::transient(format!("failure {calls}")))
        });

        assert_eq!(calls, 4);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RetriesExhausted);
        assert_eq!(err.root(), &Error::transient("failure 4"));
    }

    #[test]
    fn test_zero_retries_single_attempt() {
        let executor = RetryExecutor::new(fast_policy(0));
        let mut calls = 0;
        let result: Result<()> = executor.run("op", || {
            calls += 1;
            Err(Error::transient("nope"))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 1, .. })));
    }

    #[test]
    fn test_non_retryable_propagates_immediately() {
        let executor = RetryExecutor::new(fast_policy(5));
        let mut calls = 0;
        let result: Result<()> = executor.run("op", || {
            calls += 1;
            Err(Error::from_status(404, "not found"))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err(), Error::from_status(404, "not found"));
    }

    #[test]
    fn test_retryable_set_is_configurable() {
        let executor = RetryExecutor::new(fast_policy(2).with_retryable([FailureKind::Permanent]));
        let mut calls = 0;
        let result: Result<()> = executor.run("op", || {
            calls += 1;
            Err(Error::transient("not in the set"))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err().kind(), FailureKind::Transient);
    }

    #[test]
    fn test_delays_follow_schedule() {
        let policy = RetryPolicy::default()
            .with_max_retries(2)
            .with_delays(Duration::from_millis(100), 2.0, Duration::from_secs(5))
            .with_jitter(false);
        let executor = RetryExecutor::new(policy);

        let mut stamps = Vec::new();
        let result = executor.run("op", || {
            stamps.push(Instant::now());
            if stamps.len() < 3 {
                Err(Error::transient("flaky"))
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(stamps.len(), 3);
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(250), "{first:?}");
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(400), "{second:?}");
    }

    #[test]
    fn test_jittered_delay_bounds() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), 2.0, Duration::from_millis(1000))
            .with_jitter(true);
        for attempt in 0..8 {
            let base = policy.base_delay(attempt);
            let actual = policy.delay_for(attempt);
            assert!(actual >= base);
            assert!(actual.as_secs_f64() <= base.as_secs_f64() * 1.2 + 1e-9);
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!(policy.jitter);
        assert!(policy.is_retryable(&Error::transient("x")));
        assert!(!policy.is_retryable(&Error::permanent("x")));
        assert!(!policy.is_retryable(&Error::Cancelled));
    }
}
