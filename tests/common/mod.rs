//! Shared utilities for integration and load testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilient_fetch::{Error, Result, RetryPolicy};

/// An operation that fails with `status` for its first `failures` calls, then succeeds.
///
/// Returns the shared call counter alongside the operation.
#[allow(dead_code)]
pub fn failing_then_ok(
    failures: u32,
    status: u16,
) -> (Arc<AtomicU32>, impl Fn() -> Result<String> + Send + Sync + Clone + 'static) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = move || {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if call < failures {
            Err(Error::from_status(status, format!("call {call} failed")))
        } else {
            Ok(format!("payload {call}"))
        }
    };
    (calls, op)
}

/// Retry policy with millisecond delays and no jitter.
#[allow(dead_code)]
pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(1), 2.0, Duration::from_millis(8))
        .with_jitter(false)
}

/// Assert `elapsed` falls in `[low, high)`.
#[allow(dead_code)]
pub fn assert_elapsed_between(elapsed: Duration, low: Duration, high: Duration) {
    assert!(
        elapsed >= low && elapsed < high,
        "elapsed {elapsed:?} not in [{low:?}, {high:?})"
    );
}
