//! Operation-type routing for circuit breakers.
//!
//! # Responsibilities
//! - Map each operation-type key to its circuit breaker, created on first use
//! - Aggregate metrics and health across all registered types
//! - Fan out administrative actions (reset, destroy)
//!
//! # Design Decisions
//! - Compute-if-absent registry: a race to create the same operation's
//!   breaker converges on the first insert
//! - No cross-operation coordination: one type's failures never open
//!   another type's breaker

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::{BreakerConfig, ResilienceConfig};
use crate::error::{BreakerError, ErrorClassifier, UnknownOperation};
use crate::events::EventBus;
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};

/// Metrics rolled up across every registered operation type.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateMetrics {
    pub operations: BTreeMap<String, BreakerMetrics>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub open_circuits: u32,
}

/// Operator-facing health rollup.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    /// True when no circuit is open.
    pub healthy: bool,
    pub registered_operations: usize,
    pub open_operations: Vec<String>,
    pub half_open_operations: Vec<String>,
    pub total_requests: u64,
    pub failure_rate: f64,
}

/// Registry routing each operation type to its circuit breaker.
pub struct ResilienceManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    events: EventBus,
}

impl ResilienceManager {
    /// Create a manager with one default breaker configuration.
    pub fn new(default_config: BreakerConfig, events: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides: HashMap::new(),
            events,
        }
    }

    /// Create a manager from the full configuration, including
    /// per-operation overrides.
    pub fn from_config(config: &ResilienceConfig, events: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: config.breaker.clone(),
            overrides: config.operations.clone(),
            events,
        }
    }

    /// Get or lazily create the breaker for an operation type.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(operation)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                tracing::debug!(operation, "registering circuit breaker");
                CircuitBreaker::new(operation, config, self.events.clone())
            })
            .clone()
    }

    /// Execute `work` through the breaker registered for `operation`.
    ///
    /// This is the sole entry point the tool layer consumes; `operation` is
    /// a caller-defined label used purely for breaker isolation and
    /// reporting.
    pub async fn execute_with_resilience<T, E, F, Fut>(
        &self,
        operation: &str,
        work: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ErrorClassifier,
    {
        self.breaker(operation).execute(work).await
    }

    /// Force one operation's breaker back to Closed.
    pub fn reset_circuit_breaker(&self, operation: &str) -> Result<(), UnknownOperation> {
        match self.breakers.get(operation) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(UnknownOperation(operation.to_string())),
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Metrics for a single operation type, if registered.
    pub fn operation_metrics(&self, operation: &str) -> Option<BreakerMetrics> {
        self.breakers.get(operation).map(|b| b.metrics())
    }

    /// Metrics aggregated across all registered operation types.
    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        let mut operations = BTreeMap::new();
        let mut total_requests = 0;
        let mut successful_requests = 0;
        let mut failed_requests = 0;
        let mut rejected_requests = 0;
        let mut open_circuits = 0;

        for entry in self.breakers.iter() {
            let metrics = entry.value().metrics();
            total_requests += metrics.total_requests;
            successful_requests += metrics.successful_requests;
            failed_requests += metrics.failed_requests;
            rejected_requests += metrics.rejected_requests;
            if metrics.state == CircuitState::Open {
                open_circuits += 1;
            }
            operations.insert(entry.key().clone(), metrics);
        }

        AggregateMetrics {
            operations,
            total_requests,
            successful_requests,
            failed_requests,
            rejected_requests,
            open_circuits,
        }
    }

    /// Health rollup for the operator surface.
    pub fn system_health(&self) -> SystemHealth {
        let mut open_operations = Vec::new();
        let mut half_open_operations = Vec::new();
        let mut total_requests = 0;
        let mut successes = 0u64;
        let mut failures = 0u64;

        for entry in self.breakers.iter() {
            let metrics = entry.value().metrics();
            total_requests += metrics.total_requests;
            successes += metrics.successful_requests;
            failures += metrics.failed_requests;
            match metrics.state {
                CircuitState::Open => open_operations.push(entry.key().clone()),
                CircuitState::HalfOpen => half_open_operations.push(entry.key().clone()),
                CircuitState::Closed => {}
            }
        }
        open_operations.sort();
        half_open_operations.sort();

        let executed = successes + failures;
        SystemHealth {
            healthy: open_operations.is_empty(),
            registered_operations: self.breakers.len(),
            open_operations,
            half_open_operations,
            total_requests,
            failure_rate: if executed == 0 {
                0.0
            } else {
                (failures as f64 / executed as f64) * 100.0
            },
        }
    }

    /// Registered operation types.
    pub fn operations(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Destroy every registered breaker (stops their monitor tasks).
    pub fn destroy(&self) {
        for entry in self.breakers.iter() {
            entry.value().destroy();
        }
    }
}
