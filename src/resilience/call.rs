//! Breaker + retry composition around a single operation.
//!
//! # Data Flow
//! ```text
//! call(op)
//!     → breaker.allow_request()      (denied → CircuitOpen, no attempt made)
//!     → RetryExecutor::run(op)       (attempt-level retries)
//!     → breaker.record_success() / record_failure()   (call-level outcome only)
//! ```

use std::sync::Arc;

use crate::error::{Error, Failure, Result};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retries::{RetryExecutor, RetryPolicy};

/// A breaker and retry policy bound together. Cheap to clone; clones share the breaker.
#[derive(Debug, Clone)]
pub struct ResilientCall {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl ResilientCall {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(policy),
        }
    }

    /// Bind to the registry's breaker for `service`.
    pub fn for_service(registry: &BreakerRegistry, service: &str, policy: RetryPolicy) -> Self {
        Self::new(registry.get_or_create(service), policy)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    /// Run `op` behind the breaker with retries. The breaker sees one outcome per call.
    pub fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let service = self.breaker.name();

        if !self.breaker.allow_request() {
            let retry_in = self.breaker.retry_in().unwrap_or_default();
            tracing::warn!(service, retry_in_secs = retry_in.as_secs_f64(), "Circuit open, request rejected");
            return Err(Error::CircuitOpen {
                service: service.to_string(),
                retry_in,
            });
        }

        match self.retry.run(service, op) {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    /// Like [`call`](Self::call) but pairs any failure with a remediation hint and logs it.
    pub fn call_safe<T, F>(&self, op: F) -> std::result::Result<T, Failure>
    where
        F: FnMut() -> Result<T>,
    {
        self.call(op).map_err(|e| {
            let failure = Failure::from(e);
            tracing::warn!(
                service = self.breaker.name(),
                kind = %failure.error.kind(),
                error = %failure.error,
                "{}",
                failure.remediation.hint()
            );
            failure
        })
    }
}

/// Wrap `op` so every invocation goes through the breaker for `service` and `policy`.
///
/// The wrapper has the same success path as `op`; its failures widen to include
/// `CircuitOpen` and `RetriesExhausted`.
pub fn resilient<T, F>(
    op: F,
    policy: RetryPolicy,
    registry: &BreakerRegistry,
    service: &str,
) -> impl Fn() -> Result<T> + Send + Sync + Clone
where
    F: Fn() -> Result<T> + Send + Sync + Clone,
{
    let call = ResilientCall::for_service(registry, service, policy);
    move || call.call(&op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, Remediation};
    use crate::resilience::circuit_breaker::{BreakerPolicy, BreakerState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    fn quick_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(1), 2.0, Duration::from_millis(4))
            .with_jitter(false)
    }

    fn breaker(threshold: u32, recovery_ms: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "svc",
            BreakerPolicy::new(threshold, Duration::from_millis(recovery_ms)),
        ))
    }

    #[test]
    fn test_allows_call_when_closed() {
        let call = ResilientCall::new(breaker(3, 1000), quick_retries(2));
        assert_eq!(call.call(|| Ok(42)).unwrap(), 42);
        assert_eq!(call.breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_counts_calls_not_attempts() {
        let call = ResilientCall::new(breaker(3, 60_000), quick_retries(4));
        let attempts = AtomicU32::new(0);

        let result: Result<()> = call.call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::transient("down"))
        });

        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert_eq!(result.unwrap_err().kind(), FailureKind::RetriesExhausted);
        assert_eq!(call.breaker().failure_count(), 1);
        assert_eq!(call.breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn test_rejects_without_attempt_when_open() {
        let call = ResilientCall::new(breaker(2, 60_000), quick_retries(0));
        for _ in 0..2 {
            let _ = call.call(|| Err::<(), _>(Error::transient("down")));
        }
        assert_eq!(call.breaker().state(), BreakerState::Open);

        let attempts = AtomicU32::new(0);
        let result = call.call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        match result {
            Err(Error::CircuitOpen { service, retry_in }) => {
                assert_eq!(service, "svc");
                assert!(retry_in <= Duration::from_secs(60));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn test_permanent_failure_counts_once() {
        let call = ResilientCall::new(breaker(5, 60_000), quick_retries(3));
        let attempts = AtomicU32::new(0);
        let result: Result<()> = call.call(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::from_status(401, "unauthorized"))
        });

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().status(), Some(401));
        assert_eq!(call.breaker().failure_count(), 1);
    }

    #[test]
    fn test_recovers_through_half_open() {
        let call = ResilientCall::new(breaker(1, 30), quick_retries(0));
        let _ = call.call(|| Err::<(), _>(Error::transient("down")));
        assert_eq!(call.breaker().state(), BreakerState::Open);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(call.call(|| Ok("back")).unwrap(), "back");
        assert_eq!(call.breaker().state(), BreakerState::Closed);
        assert_eq!(call.breaker().failure_count(), 0);
    }

    #[test]
    fn test_call_safe_classifies() {
        let call = ResilientCall::new(breaker(5, 60_000), quick_retries(1));
        let failure = call
            .call_safe(|| Err::<(), _>(Error::from_status(429, "too many requests")))
            .unwrap_err();
        assert_eq!(failure.remediation, Remediation::RateLimited);
        assert_eq!(failure.error.status(), Some(429));
    }

    #[test]
    fn test_resilient_wrapper_shares_registry_breaker() {
        let registry = BreakerRegistry::new(BreakerPolicy::new(2, Duration::from_secs(60)));
        let fetch = resilient(
            || Err::<Vec<u8>, _>(Error::transient("timeout")),
            quick_retries(0),
            &registry,
            "tile_server",
        );

        assert!(fetch().is_err());
        assert!(fetch().is_err());
        assert!(matches!(fetch(), Err(Error::CircuitOpen { .. })));
        assert_eq!(
            registry.get("tile_server").unwrap().state(),
            BreakerState::Open
        );
    }
}
