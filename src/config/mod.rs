//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → converted into RetryPolicy / BreakerPolicy / PoolOptions values
//! ```
//!
//! # Design Decisions
//! - Config is plain values handed to constructors, never global state
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, LogFormat, ObservabilityConfig, PoolConfig, QueueConfig,
    ResilienceConfig, RetryConfig, ServiceConfig,
};
pub use validation::{validate_config, ValidationError};
