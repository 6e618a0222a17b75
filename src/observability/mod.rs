//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers and the connection pool produce:
//!     -> logging.rs (structured tracing events)
//!     -> metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     -> Log aggregation (stdout, file, remote)
//!     -> Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Metric updates are cheap (atomic increments behind the recorder)
//! - A process without an installed recorder pays almost nothing; every
//!   record call becomes a no-op
//! - Initialization is explicit and optional so embedding applications keep
//!   control of their global subscriber and recorder

use crate::config::schema::ObservabilityConfig;

pub mod logging;
pub mod metrics;

/// Initialize logging and, when enabled, the Prometheus exporter.
///
/// Safe to call when a subscriber is already installed; the existing one
/// wins and a debug line notes the skip.
pub fn init(config: &ObservabilityConfig) {
    logging::init_logging(&config.log_level);

    if config.metrics_enabled {
        match config.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }
}
