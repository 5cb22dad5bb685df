//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the resilience layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy applied to wrapped operations.
    pub retry: RetryConfig,

    /// Default circuit breaker settings for every service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-service breaker overrides.
    pub services: Vec<ServiceConfig>,

    /// Worker pool settings.
    pub pool: PoolConfig,

    /// Standalone bounded queue settings.
    pub queue: QueueConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts = max_retries + 1.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay on each retry.
    pub backoff_factor: f64,

    /// Ceiling for a single backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 20% random jitter to each delay.
    pub jitter: bool,

    /// Failure kinds that are retried.
    pub retry_on: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
            retry_on: vec![FailureKind::Transient, FailureKind::TaskTimeout],
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is admitted.
    pub recovery_timeout_secs: u64,

    /// Concurrent probes admitted while half-open. Unset means unlimited.
    pub half_open_max_calls: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_max_calls: None,
        }
    }
}

/// Breaker overrides for a single named service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name (e.g., "tile_server", "dem_service").
    pub name: String,

    #[serde(default)]
    pub failure_threshold: Option<u32>,

    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,

    #[serde(default)]
    pub half_open_max_calls: Option<u32>,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Per-task deadline in seconds, measured from when a worker picks the task up.
    pub task_timeout_secs: u64,

    /// Capacity of the task buffer; `submit` blocks when it is full.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            task_timeout_secs: 30,
            queue_capacity: 1024,
        }
    }
}

/// Standalone queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of buffered items.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
