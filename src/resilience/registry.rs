//! Registry of circuit breakers keyed by service name.
//!
//! # Responsibilities
//! - Hand out exactly one breaker per service name
//! - Apply per-service policy overrides from configuration
//! - Report the state of every breaker
//!
//! # Design Decisions
//! - Owned and injected (usually as `Arc<BreakerRegistry>`), never a global
//! - First creator of a name wins; later policies for the same name are ignored

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::ResilienceConfig;
use crate::resilience::circuit_breaker::{BreakerPolicy, BreakerSnapshot, CircuitBreaker};

#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_policy: BreakerPolicy,
    overrides: HashMap<String, BreakerPolicy>,
}

impl BreakerRegistry {
    pub fn new(default_policy: BreakerPolicy) -> Self {
        Self {
            breakers: DashMap::new(),
            default_policy,
            overrides: HashMap::new(),
        }
    }

    /// Build a registry from the `circuit_breaker` defaults and `services` overrides.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let default_policy = BreakerPolicy::from(&config.circuit_breaker);
        let overrides = config
            .services
            .iter()
            .map(|service| {
                let mut policy = default_policy;
                if let Some(threshold) = service.failure_threshold {
                    policy.failure_threshold = threshold.max(1);
                }
                if let Some(secs) = service.recovery_timeout_secs {
                    policy.recovery_timeout = Duration::from_secs(secs);
                }
                if let Some(calls) = service.half_open_max_calls {
                    policy = policy.with_half_open_max_calls(calls);
                }
                (service.name.clone(), policy)
            })
            .collect();

        Self {
            breakers: DashMap::new(),
            default_policy,
            overrides,
        }
    }

    /// Policy a newly created breaker for `name` would get.
    pub fn policy_for(&self, name: &str) -> BreakerPolicy {
        self.overrides.get(name).copied().unwrap_or(self.default_policy)
    }

    /// The breaker for `name`, created from the configured policy on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.policy_for(name))
    }

    /// The breaker for `name`, created with `policy` if it does not exist yet.
    pub fn get_or_create_with(&self, name: &str, policy: BreakerPolicy) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            if existing.policy() != &policy {
                tracing::debug!(service = %name, "Breaker already registered, ignoring new policy");
            }
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    service = %name,
                    failure_threshold = policy.failure_threshold,
                    recovery_timeout_secs = policy.recovery_timeout.as_secs_f64(),
                    "Circuit breaker registered"
                );
                Arc::new(CircuitBreaker::new(name, policy))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.value().clone())
    }

    /// Force a breaker closed. Returns false if no breaker exists for `name`.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|r| r.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
