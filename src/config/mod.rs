//! Configuration management.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{BreakerConfig, ConnectionConfig, ObservabilityConfig, ResilienceConfig};
pub use validation::{validate_config, ValidationError};
