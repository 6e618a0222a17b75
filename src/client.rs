//! Top-level facade combining breakers and the connection pool.
//!
//! # Responsibilities
//! - Route each request through its operation type's circuit breaker and
//!   then the pooled HTTP execution engine
//! - Expose the administrative surface (reset, metrics, health, shutdown)
//!
//! # Design Decisions
//! - One `EventBus` shared by every component so a single subscription
//!   observes the whole system
//! - The facade owns the component lifecycles; `destroy` tears down both
//!   layers

use std::sync::Arc;

use crate::config::schema::ResilienceConfig;
use crate::connection::manager::{ConnectionManager, ConnectionMetrics, ExecutedRequest, RequestSpec};
use crate::error::{BreakerError, RequestError, UnknownOperation};
use crate::events::{Event, EventBus};
use crate::resilience::circuit_breaker::BreakerMetrics;
use crate::resilience::manager::{AggregateMetrics, ResilienceManager, SystemHealth};

/// HTTP client with per-operation circuit breaking, pooled transports,
/// and transport-level retries.
pub struct ResilientClient {
    resilience: ResilienceManager,
    connections: Arc<ConnectionManager>,
    events: EventBus,
}

impl ResilientClient {
    /// Build a client from configuration. Spawns the configured monitor
    /// tasks; requires a tokio runtime.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_events(config, EventBus::default())
    }

    /// Build a client that publishes to a caller-supplied event bus.
    pub fn with_events(config: ResilienceConfig, events: EventBus) -> Self {
        let resilience = ResilienceManager::from_config(&config, events.clone());
        let connections = ConnectionManager::new(config.connection.clone(), events.clone());
        Self {
            resilience,
            connections,
            events,
        }
    }

    /// Subscribe to the client's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Execute a request under the circuit breaker registered for
    /// `operation`.
    ///
    /// An open breaker rejects immediately with [`BreakerError::Open`];
    /// admitted requests go through the pooled transport with retries, and
    /// a terminal transport failure counts as a single breaker failure.
    pub async fn request(
        &self,
        operation: &str,
        spec: RequestSpec,
    ) -> Result<ExecutedRequest, BreakerError<RequestError>> {
        self.resilience
            .execute_with_resilience(operation, || self.connections.execute_request(spec))
            .await
    }

    /// The shared connection pool, for callers bypassing the breakers.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// The breaker registry, for direct breaker access.
    pub fn resilience(&self) -> &ResilienceManager {
        &self.resilience
    }

    /// Force one operation's breaker back to Closed.
    pub fn reset_circuit_breaker(&self, operation: &str) -> Result<(), UnknownOperation> {
        self.resilience.reset_circuit_breaker(operation)
    }

    /// Metrics for one operation type, if its breaker exists.
    pub fn operation_metrics(&self, operation: &str) -> Option<BreakerMetrics> {
        self.resilience.operation_metrics(operation)
    }

    /// Breaker metrics rolled up across every operation type.
    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        self.resilience.aggregate_metrics()
    }

    /// Operator-facing health rollup of the breaker registry.
    pub fn system_health(&self) -> SystemHealth {
        self.resilience.system_health()
    }

    /// Connection pool statistics snapshot.
    pub fn connection_metrics(&self) -> ConnectionMetrics {
        self.connections.metrics()
    }

    /// Connection reuse rate as a percentage.
    pub fn connection_reuse_rate(&self) -> f64 {
        self.connections.connection_reuse_rate()
    }

    /// Invalidate every cached DNS resolution.
    pub fn clear_dns_cache(&self) {
        self.connections.clear_dns_cache();
    }

    /// Shut down both layers: stop monitors, close pooled agents, reject
    /// further requests. Idempotent.
    pub fn destroy(&self) {
        self.resilience.destroy();
        self.connections.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BreakerConfig, ConnectionConfig};
    use crate::connection::agent::Protocol;
    use crate::resilience::circuit_breaker::CircuitState;

    fn quiet_config() -> ResilienceConfig {
        ResilienceConfig {
            breaker: BreakerConfig {
                monitor_interval_ms: 0,
                ..BreakerConfig::default()
            },
            connection: ConnectionConfig {
                monitor_interval_ms: 0,
                retry_attempts: 1,
                connect_timeout_ms: 200,
                ..ConnectionConfig::default()
            },
            ..ResilienceConfig::default()
        }
    }

    #[tokio::test]
    async fn destroyed_client_rejects_requests() {
        let client = ResilientClient::new(quiet_config());
        client.destroy();

        let err = client
            .request("PING", RequestSpec::get(Protocol::Http, "127.0.0.1:1", "/"))
            .await
            .unwrap_err();
        match err {
            BreakerError::Upstream(RequestError::Destroyed) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failures_count_against_the_breaker() {
        let mut config = quiet_config();
        config.breaker.failure_threshold = 1;
        let client = ResilientClient::new(config);

        // nothing listens on port 1; connect fails, retries exhaust
        let _ = client
            .request("PING", RequestSpec::get(Protocol::Http, "127.0.0.1:1", "/"))
            .await;

        assert_eq!(
            client.resilience().breaker("PING").state(),
            CircuitState::Open
        );
        let metrics = client.operation_metrics("PING").unwrap();
        assert_eq!(metrics.failed_requests, 1);
    }
}
