//! In-process stand-in for a remote tile/DEM server.
//!
//! Used by the `simulate` command and by tests to drive the resilience
//! primitives without a network.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;

use crate::error::{Error, Result};

/// How a simulated service misbehaves.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultProfile {
    /// Probability in `[0, 1]` that a call fails.
    pub failure_rate: f64,
    /// Latency added to every call.
    pub latency: Duration,
    /// Status code reported by random failures.
    pub failure_status: u16,
    /// Calls (0-based) inside this range fail with 503 regardless of `failure_rate`.
    pub outage: Option<Range<u64>>,
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            failure_status: 503,
            outage: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub calls: u64,
    pub failures: u64,
}

/// A fake remote service.
#[derive(Debug)]
pub struct FlakyService {
    name: String,
    profile: FaultProfile,
    /// Scripted outcomes consumed in order: `None` succeeds, `Some(status)` fails.
    script: Mutex<VecDeque<Option<u16>>>,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl FlakyService {
    pub fn new(name: impl Into<String>, profile: FaultProfile) -> Self {
        Self {
            name: name.into(),
            profile,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A service that plays back `script` and then always succeeds.
    pub fn scripted(name: impl Into<String>, script: impl IntoIterator<Item = Option<u16>>) -> Self {
        let service = Self::new(name, FaultProfile::default());
        service.script.lock().extend(script);
        service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            calls: self.calls.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }

    /// Fetch `key`. Returns the payload `"<service>/<key>"` on success.
    pub fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.profile.latency.is_zero() {
            thread::sleep(self.profile.latency);
        }

        if let Some(status) = self.next_failure(call) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(service = %self.name, key, status, "Simulated failure");
            return Err(Error::from_status(status, format!("{} returned {status} for {key}", self.name)));
        }

        Ok(format!("{}/{key}", self.name).into_bytes())
    }

    fn next_failure(&self, call: u64) -> Option<u16> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        if self.profile.outage.as_ref().is_some_and(|outage| outage.contains(&call)) {
            return Some(503);
        }
        let rate = self.profile.failure_rate.clamp(0.0, 1.0);
        if rate > 0.0 && rand::thread_rng().gen_bool(rate) {
            return Some(self.profile.failure_status);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_scripted_playback() {
        let service = FlakyService::scripted("tiles", [Some(503), Some(401), None]);
        assert_eq!(service.fetch("a").unwrap_err().kind(), FailureKind::Transient);
        assert_eq!(service.fetch("a").unwrap_err().status(), Some(401));
        assert_eq!(service.fetch("a").unwrap(), b"tiles/a".to_vec());
        assert!(service.fetch("b").is_ok());
        assert_eq!(service.stats(), ServiceStats { calls: 4, failures: 2 });
    }

    #[test]
    fn test_outage_window() {
        let service = FlakyService::new(
            "dem",
            FaultProfile {
                outage: Some(1..3),
                ..FaultProfile::default()
            },
        );
        let outcomes: Vec<bool> = (0..4).map(|_| service.fetch("x").is_ok()).collect();
        assert_eq!(outcomes, vec![true, false, false, true]);
    }

    #[test]
    fn test_failure_rate_extremes() {
        let always = FlakyService::new(
            "down",
            FaultProfile {
                failure_rate: 1.0,
                failure_status: 429,
                ..FaultProfile::default()
            },
        );
        assert!((0..20).all(|_| always.fetch("k").unwrap_err().status() == Some(429)));

        let never = FlakyService::new("up", FaultProfile::default());
        assert!((0..20).all(|_| never.fetch("k").is_ok()));
    }
}
