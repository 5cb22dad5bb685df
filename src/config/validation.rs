//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered, capacities > 0)
//! - Detect duplicate service overrides
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry.backoff_factor must be a finite number >= 1.0")]
    BackoffFactor,

    #[error("retry.initial_delay_ms ({initial}) exceeds retry.max_delay_ms ({max})")]
    DelayOrder { initial: u64, max: u64 },

    #[error("services entry {index} has an empty name")]
    EmptyServiceName { index: usize },

    #[error("service {0:?} is configured more than once")]
    DuplicateService(String),

    #[error("invalid metrics_address {0:?}")]
    MetricsAddress(String),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
        errors.push(ValidationError::BackoffFactor);
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            initial: retry.initial_delay_ms,
            max: retry.max_delay_ms,
        });
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.failure_threshold" });
    }
    if config.circuit_breaker.half_open_max_calls == Some(0) {
        errors.push(ValidationError::Zero { field: "circuit_breaker.half_open_max_calls" });
    }

    let mut seen = HashSet::new();
    for (index, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName { index });
        } else if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.failure_threshold == Some(0) {
            errors.push(ValidationError::Zero { field: "services.failure_threshold" });
        }
        if service.half_open_max_calls == Some(0) {
            errors.push(ValidationError::Zero { field: "services.half_open_max_calls" });
        }
    }

    if config.pool.workers == 0 {
        errors.push(ValidationError::Zero { field: "pool.workers" });
    }
    if config.pool.task_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "pool.task_timeout_secs" });
    }
    if config.pool.queue_capacity == 0 {
        errors.push(ValidationError::Zero { field: "pool.queue_capacity" });
    }
    if config.queue.capacity == 0 {
        errors.push(ValidationError::Zero { field: "queue.capacity" });
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ResilienceConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ResilienceConfig::default();
        config.retry.backoff_factor = 0.5;
        config.retry.initial_delay_ms = 60_000;
        config.pool.workers = 0;
        config.queue.capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::BackoffFactor));
        assert!(errors.contains(&ValidationError::Zero { field: "pool.workers" }));
    }

    #[test]
    fn test_duplicate_services() {
        let mut config = ResilienceConfig::default();
        for _ in 0..2 {
            config.services.push(ServiceConfig {
                name: "dem_service".into(),
                failure_threshold: Some(5),
                recovery_timeout_secs: None,
                half_open_max_calls: None,
            });
        }

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateService("dem_service".into())]);
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = ResilienceConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
