//! Configuration validation.

use std::fmt;

use crate::config::schema::{BreakerConfig, ResilienceConfig};

/// A single configuration problem, with enough context to locate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "breaker.failure_threshold").
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_breaker(prefix: &str, config: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold < 1 {
        errors.push(ValidationError {
            field: format!("{prefix}.failure_threshold"),
            message: "must be at least 1".into(),
        });
    }
    if config.success_threshold < 1 {
        errors.push(ValidationError {
            field: format!("{prefix}.success_threshold"),
            message: "must be at least 1".into(),
        });
    }
}

/// Validate a configuration, collecting every problem rather than stopping
/// at the first.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("breaker", &config.breaker, &mut errors);
    for (operation, breaker) in &config.operations {
        check_breaker(&format!("operations.{operation}"), breaker, &mut errors);
    }

    let conn = &config.connection;
    if conn.retry_attempts < 1 {
        errors.push(ValidationError {
            field: "connection.retry_attempts".into(),
            message: "must be at least 1".into(),
        });
    }
    if conn.max_sockets_per_agent < 1 {
        errors.push(ValidationError {
            field: "connection.max_sockets_per_agent".into(),
            message: "must be at least 1".into(),
        });
    }
    if conn.base_delay_ms > conn.max_delay_ms {
        errors.push(ValidationError {
            field: "connection.base_delay_ms".into(),
            message: format!(
                "must not exceed max_delay_ms ({} > {})",
                conn.base_delay_ms, conn.max_delay_ms
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
