//! Timeout enforcement for a single operation.
//!
//! # Responsibilities
//! - Run one operation on its own named thread
//! - Join it against a deadline
//!
//! # Design Decisions
//! - Independent of the pool; every call gets a fresh thread
//! - On timeout the thread is abandoned, not killed. It may still finish and
//!   its side effects still happen; the result is dropped
//! - A panic inside the operation is reported as `Panicked`, never re-raised

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};

use crate::error::{panic_message, Error, Result};

/// Run `f` on a separate thread and wait at most `timeout` for its result.
pub fn run_with_timeout<T, F>(f: F, timeout: Duration) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);

    thread::Builder::new()
        .name("timeout-runner".into())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));
            // Receiver is gone once the caller timed out.
            let _ = tx.send(outcome);
        })
        .map_err(|e| Error::permanent(format!("failed to spawn timeout runner: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Operation timed out, abandoning thread");
            Err(Error::TaskTimeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::Panicked("runner exited without a result".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_returns_value_before_deadline() {
        let result = run_with_timeout(|| Ok(7), Duration::from_secs(1));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_propagates_operation_failure() {
        let result: Result<()> =
            run_with_timeout(|| Err(Error::permanent("bad input")), Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::permanent("bad input"));
    }

    #[test]
    fn test_times_out_and_abandons() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let start = Instant::now();
        let result = run_with_timeout(
            move || {
                thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(50),
        );

        assert_eq!(result.unwrap_err(), Error::TaskTimeout(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_millis(180));
        assert!(!finished.load(Ordering::SeqCst));

        // The abandoned thread keeps running to completion.
        thread::sleep(Duration::from_millis(300));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_is_captured() {
        let result: Result<()> = run_with_timeout(|| panic!("tile decoder blew up"), Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::Panicked("tile decoder blew up".into()));
    }
}
