//! Structured event stream for telemetry sinks.
//!
//! # Responsibilities
//! - Define the full event vocabulary of the resilience core
//! - Fan events out to any number of subscribers without blocking emitters
//!
//! # Design Decisions
//! - One broadcast channel of typed events instead of per-event callback
//!   registration; sinks pattern-match on the variants they care about
//! - Emission never fails the operation path; with no subscribers the event
//!   is simply dropped
//! - Slow subscribers lag and lose the oldest events rather than applying
//!   backpressure to request handling

use serde::Serialize;
use tokio::sync::broadcast;

use crate::resilience::circuit_breaker::CircuitState;

/// Every observable occurrence in the resilience core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A breaker moved between states through normal operation.
    StateChange {
        operation: String,
        from: CircuitState,
        to: CircuitState,
        reason: &'static str,
    },
    /// An operator overrode a breaker's state directly.
    StateForced {
        operation: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// A breaker was reset to Closed with all counters zeroed.
    Reset { operation: String },
    /// Work guarded by a breaker completed successfully.
    RequestSuccess { operation: String, latency_ms: u64 },
    /// Work guarded by a breaker failed with an unexpected error.
    RequestFailure {
        operation: String,
        classification: String,
        consecutive_failures: u32,
    },
    /// A call was rejected without running because the breaker is open.
    RequestRejected {
        operation: String,
        time_until_retry_ms: u64,
    },
    /// Work failed with an error the breaker is configured to expect.
    ExpectedError {
        operation: String,
        classification: String,
    },
    /// A breaker's failure rate crossed the alert threshold.
    HighFailureRate {
        operation: String,
        failure_rate: f64,
        threshold: f64,
    },
    /// A breaker's average response time crossed the alert threshold.
    HighResponseTime {
        operation: String,
        average_ms: f64,
        threshold_ms: f64,
    },
    /// A breaker was destroyed; final snapshot of its lifetime.
    BreakerDestroyed {
        operation: String,
        final_state: CircuitState,
        total_requests: u64,
        uptime_ms: u64,
    },

    /// A new pooled transport agent was created for a destination.
    AgentCreated { protocol: String, authority: String },
    /// An existing agent was reused for a destination.
    ConnectionReused { protocol: String, authority: String },
    /// A pooled request completed; transport-level success.
    RequestExecuted {
        authority: String,
        status: u16,
        attempts: u32,
        latency_ms: u64,
        http_version: String,
    },
    /// A transport attempt failed and will be retried after a delay.
    RequestRetry {
        authority: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// All transport attempts for a request failed.
    RequestFailed {
        authority: String,
        attempts: u32,
        error: String,
    },
    /// Periodic connection-pool health snapshot.
    HealthCheck {
        reuse_rate: f64,
        failure_rate: f64,
        average_latency_ms: f64,
        active_agents: usize,
    },
    /// A pool health metric crossed its threshold.
    PerformanceAlert {
        kind: &'static str,
        value: f64,
        threshold: f64,
    },
    /// The DNS cache was explicitly invalidated.
    DnsCacheCleared { entries: usize },
    /// A component was shut down and released its resources.
    Destroyed { component: &'static str },
}

/// Broadcast fan-out for [`Event`]s.
///
/// Cloning is cheap; all clones feed the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks; dropped if nobody is listening.
    pub fn emit(&self, event: Event) {
        tracing::trace!(?event, "emitting event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(Event::Reset {
            operation: "PROPERTY_READ".into(),
        });

        match rx.recv().await.unwrap() {
            Event::Reset { operation } => assert_eq!(operation, "PROPERTY_READ"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new(8);
        bus.emit(Event::DnsCacheCleared { entries: 0 });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
