//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience core. All types derive Serde traits for deserialization from
//! config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Default circuit breaker settings for every operation type.
    pub breaker: BreakerConfig,

    /// Per-operation-type overrides of the breaker settings.
    pub operations: HashMap<String, BreakerConfig>,

    /// Connection pool and transport retry settings.
    pub connection: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ResilienceConfig {
    /// Resolve the breaker config for an operation type, falling back to
    /// the defaults when no override exists.
    pub fn breaker_for(&self, operation: &str) -> BreakerConfig {
        self.operations
            .get(operation)
            .cloned()
            .unwrap_or_else(|| self.breaker.clone())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive unexpected failures before the circuit opens.
    pub failure_threshold: u32,

    /// Consecutive probe successes in half-open before the circuit closes.
    pub success_threshold: u32,

    /// Time an open circuit waits before admitting a recovery probe,
    /// in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Health monitor interval in milliseconds (0 disables the monitor).
    pub monitor_interval_ms: u64,

    /// Error classifications that never move the breaker state
    /// (business-expected errors, e.g. "not_found").
    pub expected_errors: Vec<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
            monitor_interval_ms: 10_000,
            expected_errors: Vec::new(),
        }
    }
}

/// Connection pool and transport retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum idle pooled sockets kept per destination agent.
    pub max_sockets_per_agent: usize,

    /// Enable TCP keep-alive on pooled sockets.
    pub keep_alive: bool,

    /// Enable HTTP/2 (ALPN negotiation prefers h2 on HTTPS).
    pub http2: bool,

    /// Total attempt budget per request (first try included).
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of random jitter added to each backoff delay,
    /// in milliseconds.
    pub jitter_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Pool health monitor interval in milliseconds (0 disables).
    pub monitor_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_sockets_per_agent: 20,
            keep_alive: true,
            http2: true,
            retry_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter_ms: 100,
            connect_timeout_ms: 5_000,
            idle_timeout_secs: 30,
            monitor_interval_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
