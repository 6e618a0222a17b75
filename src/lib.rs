//! Resilience and adaptive connection management for HTTP integrations.
//!
//! # Architecture Overview
//!
//! ```text
//!  caller (tool layer)
//!      |
//!      v
//!  ResilienceManager -- operation type --> CircuitBreaker (Closed/Open/HalfOpen)
//!      |                                        |
//!      |                                        v  admitted work
//!      +----------------------------> ConnectionManager
//!                                        +- agent pool (one per protocol+host)
//!                                        +- DNS cache
//!                                        +- transport retries with backoff
//! ```
//!
//! The circuit breaker reacts to operation-level failures; the connection
//! manager retries transport-level failures (DNS, connect, timeout) locally
//! and surfaces at most one terminal error per call. The two layers are
//! deliberately decoupled: breakers know nothing about sockets, and the
//! connection pool knows nothing about operation semantics.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod observability;
pub mod resilience;

pub use client::ResilientClient;
pub use config::schema::{BreakerConfig, ConnectionConfig, ObservabilityConfig, ResilienceConfig};
pub use connection::agent::{Agent, AgentKey, Protocol};
pub use connection::manager::{
    ConnectionManager, ConnectionMetrics, ExecutedRequest, RequestMetrics, RequestSpec,
};
pub use error::{BreakerError, ErrorClassifier, RequestError, UnknownOperation};
pub use events::{Event, EventBus};
pub use resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use resilience::manager::{AggregateMetrics, ResilienceManager, SystemHealth};
