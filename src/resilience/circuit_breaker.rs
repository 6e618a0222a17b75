//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: testing if the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed -> Open: consecutive unexpected failures reach failure_threshold
//! Open -> Half-Open: first call after recovery_timeout elapses
//! Half-Open -> Closed: success_threshold probe successes
//! Half-Open -> Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-operation-type breaker (not global)
//! - Fail fast in Open state, reporting time-until-retry to the caller
//! - Strict single probe in Half-Open (prevents hammering a recovering
//!   dependency); the probe slot is held by an RAII guard so a cancelled
//!   probe cannot wedge the breaker
//! - Transitions are serialized by one mutex, never held across `.await`;
//!   monotonic totals are lock-free atomics
//! - Errors matching a configured classification are business-expected and
//!   never move the state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::BreakerConfig;
use crate::error::{BreakerError, ErrorClassifier};
use crate::events::{Event, EventBus};
use crate::observability::metrics;

/// Failure rate (percent) above which the monitor raises an alert.
const FAILURE_RATE_ALERT_THRESHOLD: f64 = 50.0;
/// Average response time (ms) above which the monitor raises an alert.
const RESPONSE_TIME_ALERT_THRESHOLD_MS: f64 = 10_000.0;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Transition-relevant state, serialized under one mutex.
#[derive(Debug)]
struct Core {
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    probe_in_flight: bool,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl Core {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_successes: 0,
            probe_in_flight: false,
            last_failure: None,
            last_success: None,
        }
    }
}

/// Monotonic lifetime counters. Relaxed ordering is sufficient: these feed
/// metrics only and never gate a transition.
#[derive(Debug, Default)]
struct Totals {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    timeouts: AtomicU64,
    expected_errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_samples: AtomicU64,
}

/// Point-in-time metrics snapshot for one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub operation: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub timeouts: u64,
    pub expected_errors: u64,
    pub consecutive_failures: u32,
    /// failed / (successful + failed), percent. Rejections are excluded:
    /// they never reached the dependency.
    pub failure_rate: f64,
    pub success_rate: f64,
    pub average_response_ms: f64,
    /// Admitted requests per second over the breaker's lifetime.
    pub request_rate: f64,
    pub uptime_ms: u64,
    pub last_failure_ms_ago: Option<u64>,
    pub last_success_ms_ago: Option<u64>,
}

enum Admission {
    Allowed { probe: bool },
    Rejected { time_until_retry: Duration },
}

/// Releases the half-open probe slot if the probe never reported an outcome
/// (caller dropped the future mid-flight).
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeSlot<'_> {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut core = self.breaker.core();
            core.probe_in_flight = false;
            tracing::debug!(
                operation = %self.breaker.operation,
                "probe abandoned; releasing probe slot"
            );
        }
    }
}

/// A per-operation-type circuit breaker guarding a callable unit of work.
pub struct CircuitBreaker {
    operation: String,
    config: BreakerConfig,
    core: Mutex<Core>,
    totals: Totals,
    created_at: Instant,
    events: EventBus,
    monitor_stop: watch::Sender<bool>,
    destroyed: AtomicBool,
}

impl CircuitBreaker {
    /// Create a breaker and spawn its health monitor task (when the
    /// configured interval is non-zero; requires a tokio runtime).
    pub fn new(
        operation: impl Into<String>,
        config: BreakerConfig,
        events: EventBus,
    ) -> Arc<Self> {
        let (monitor_stop, stop_rx) = watch::channel(false);
        let breaker = Arc::new(Self {
            operation: operation.into(),
            config,
            core: Mutex::new(Core::new()),
            totals: Totals::default(),
            created_at: Instant::now(),
            events,
            monitor_stop,
            destroyed: AtomicBool::new(false),
        });

        if breaker.config.monitor_interval_ms > 0 {
            Self::spawn_monitor(&breaker, stop_rx);
        }

        breaker
    }

    /// Operation type this breaker guards.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. Does not advance Open -> Half-Open; that happens only
    /// on admission, so observing the state has no side effects.
    pub fn state(&self) -> CircuitState {
        self.core().state
    }

    /// Execute `work` under this breaker's protection.
    ///
    /// Concurrent closed-state calls run independently; the only
    /// coordination point is the threshold check after each recorded
    /// outcome.
    pub async fn execute<T, E, F, Fut>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: ErrorClassifier,
    {
        let probe = match self.admit() {
            Admission::Rejected { time_until_retry } => {
                return Err(self.reject(time_until_retry));
            }
            Admission::Allowed { probe } => probe,
        };

        let slot = ProbeSlot {
            breaker: self,
            armed: probe,
        };
        self.totals.requests.fetch_add(1, Ordering::Relaxed);

        let start = Instant::now();
        let result = work().await;
        let latency = start.elapsed();
        slot.defuse();

        match result {
            Ok(value) => {
                self.record_success(latency, probe);
                Ok(value)
            }
            Err(error) => {
                let classification = error.classification().to_string();
                if classification == "timeout" {
                    self.totals.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                if self.is_expected(&classification) {
                    self.record_expected(&classification, latency, probe);
                } else {
                    self.record_failure(&classification, latency, probe);
                }
                Err(BreakerError::Upstream(error))
            }
        }
    }

    fn is_expected(&self, classification: &str) -> bool {
        self.config
            .expected_errors
            .iter()
            .any(|expected| expected == classification)
    }

    fn admit(&self) -> Admission {
        let mut core = self.core();
        match core.state {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let recovery = Duration::from_millis(self.config.recovery_timeout_ms);
                let since_failure = core
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(recovery);
                if since_failure >= recovery {
                    self.transition(&mut core, CircuitState::HalfOpen, "Recovery timeout elapsed");
                    core.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected {
                        time_until_retry: recovery - since_failure,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if core.probe_in_flight {
                    Admission::Rejected {
                        time_until_retry: Duration::ZERO,
                    }
                } else {
                    core.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    fn reject<E>(&self, time_until_retry: Duration) -> BreakerError<E> {
        self.totals.rejections.fetch_add(1, Ordering::Relaxed);
        metrics::record_breaker_rejection(&self.operation);
        tracing::debug!(
            operation = %self.operation,
            time_until_retry_ms = time_until_retry.as_millis() as u64,
            "request rejected by open circuit"
        );
        self.events.emit(Event::RequestRejected {
            operation: self.operation.clone(),
            time_until_retry_ms: time_until_retry.as_millis() as u64,
        });
        BreakerError::Open {
            operation: self.operation.clone(),
            time_until_retry,
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.totals
            .latency_sum_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.totals.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, latency: Duration, probe: bool) {
        self.totals.successes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        metrics::record_breaker_request(&self.operation, "success", latency);

        {
            let mut core = self.core();
            core.last_success = Some(Instant::now());
            match core.state {
                CircuitState::Closed => core.consecutive_failures = 0,
                CircuitState::HalfOpen if probe => {
                    core.probe_in_flight = false;
                    core.trial_successes += 1;
                    if core.trial_successes >= self.config.success_threshold {
                        self.transition(&mut core, CircuitState::Closed, "Success threshold reached");
                    }
                }
                // A closed-era call finishing late, or an impossible state;
                // count it but leave the trial untouched.
                CircuitState::HalfOpen | CircuitState::Open => {}
            }
        }

        self.events.emit(Event::RequestSuccess {
            operation: self.operation.clone(),
            latency_ms: latency.as_millis() as u64,
        });
    }

    fn record_failure(&self, classification: &str, latency: Duration, probe: bool) {
        self.totals.failures.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        metrics::record_breaker_request(&self.operation, "failure", latency);

        let consecutive_failures;
        {
            let mut core = self.core();
            core.last_failure = Some(Instant::now());
            match core.state {
                CircuitState::Closed => {
                    core.consecutive_failures += 1;
                    if core.consecutive_failures >= self.config.failure_threshold {
                        self.transition(&mut core, CircuitState::Open, "Failure threshold exceeded");
                    }
                }
                CircuitState::HalfOpen if probe => {
                    core.probe_in_flight = false;
                    core.trial_successes = 0;
                    self.transition(&mut core, CircuitState::Open, "Probe failed");
                }
                CircuitState::HalfOpen | CircuitState::Open => {}
            }
            consecutive_failures = core.consecutive_failures;
        }

        self.events.emit(Event::RequestFailure {
            operation: self.operation.clone(),
            classification: classification.to_string(),
            consecutive_failures,
        });
    }

    /// Expected errors never move the state machine, in either direction: a
    /// probe finishing with an expected classification releases the probe
    /// slot but counts neither as trial progress nor as a probe failure, so
    /// the next call simply probes again.
    fn record_expected(&self, classification: &str, latency: Duration, probe: bool) {
        self.totals.failures.fetch_add(1, Ordering::Relaxed);
        self.totals.expected_errors.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        metrics::record_breaker_request(&self.operation, "expected_error", latency);

        if probe {
            let mut core = self.core();
            core.probe_in_flight = false;
        }

        tracing::debug!(
            operation = %self.operation,
            classification,
            "expected error; breaker state unchanged"
        );
        self.events.emit(Event::ExpectedError {
            operation: self.operation.clone(),
            classification: classification.to_string(),
        });
    }

    /// Move the state machine. Called with the core lock held so that
    /// transitions (and their emitted events) are totally ordered.
    fn transition(&self, core: &mut Core, to: CircuitState, reason: &'static str) {
        let from = core.state;
        if from == to {
            return;
        }
        core.state = to;
        match to {
            CircuitState::Closed => {
                core.consecutive_failures = 0;
                core.trial_successes = 0;
                core.probe_in_flight = false;
            }
            CircuitState::HalfOpen => {
                core.trial_successes = 0;
            }
            CircuitState::Open => {
                core.trial_successes = 0;
                core.probe_in_flight = false;
            }
        }

        metrics::record_breaker_transition(&self.operation, to);
        if to == CircuitState::Open {
            tracing::warn!(operation = %self.operation, %from, %to, reason, "circuit state change");
        } else {
            tracing::info!(operation = %self.operation, %from, %to, reason, "circuit state change");
        }
        self.events.emit(Event::StateChange {
            operation: self.operation.clone(),
            from,
            to,
            reason,
        });
    }

    /// Override the state machine directly (operator intervention).
    ///
    /// Emits `StateForced` rather than a normal transition event. Forcing
    /// Open starts a fresh recovery window.
    pub fn force_state(&self, to: CircuitState) {
        let from;
        {
            let mut core = self.core();
            from = core.state;
            core.state = to;
            core.probe_in_flight = false;
            core.trial_successes = 0;
            if to == CircuitState::Open {
                core.last_failure = Some(Instant::now());
            }
        }

        metrics::record_breaker_transition(&self.operation, to);
        tracing::warn!(operation = %self.operation, %from, %to, "circuit state forced");
        self.events.emit(Event::StateForced {
            operation: self.operation.clone(),
            from,
            to,
        });
    }

    /// Force Closed and zero every counter.
    pub fn reset(&self) {
        {
            let mut core = self.core();
            *core = Core::new();
        }
        self.totals.requests.store(0, Ordering::Relaxed);
        self.totals.successes.store(0, Ordering::Relaxed);
        self.totals.failures.store(0, Ordering::Relaxed);
        self.totals.rejections.store(0, Ordering::Relaxed);
        self.totals.timeouts.store(0, Ordering::Relaxed);
        self.totals.expected_errors.store(0, Ordering::Relaxed);
        self.totals.latency_sum_ms.store(0, Ordering::Relaxed);
        self.totals.latency_samples.store(0, Ordering::Relaxed);

        tracing::info!(operation = %self.operation, "circuit breaker reset");
        self.events.emit(Event::Reset {
            operation: self.operation.clone(),
        });
    }

    /// Stop the monitor task and emit a final lifetime snapshot.
    /// Idempotent; the breaker itself remains usable for callers that still
    /// hold it, but no further background work runs.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.monitor_stop.send(true);

        let snapshot = self.metrics();
        tracing::info!(
            operation = %self.operation,
            final_state = %snapshot.state,
            total_requests = snapshot.total_requests,
            uptime_ms = snapshot.uptime_ms,
            "circuit breaker destroyed"
        );
        self.events.emit(Event::BreakerDestroyed {
            operation: self.operation.clone(),
            final_state: snapshot.state,
            total_requests: snapshot.total_requests,
            uptime_ms: snapshot.uptime_ms,
        });
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> BreakerMetrics {
        let (state, consecutive_failures, last_failure, last_success) = {
            let core = self.core();
            (
                core.state,
                core.consecutive_failures,
                core.last_failure,
                core.last_success,
            )
        };

        let successes = self.totals.successes.load(Ordering::Relaxed);
        let failures = self.totals.failures.load(Ordering::Relaxed);
        let executed = successes + failures;
        let latency_samples = self.totals.latency_samples.load(Ordering::Relaxed);
        let uptime = self.created_at.elapsed();

        BreakerMetrics {
            operation: self.operation.clone(),
            state,
            total_requests: self.totals.requests.load(Ordering::Relaxed),
            successful_requests: successes,
            failed_requests: failures,
            rejected_requests: self.totals.rejections.load(Ordering::Relaxed),
            timeouts: self.totals.timeouts.load(Ordering::Relaxed),
            expected_errors: self.totals.expected_errors.load(Ordering::Relaxed),
            consecutive_failures,
            failure_rate: percentage(failures, executed),
            success_rate: percentage(successes, executed),
            average_response_ms: if latency_samples == 0 {
                0.0
            } else {
                self.totals.latency_sum_ms.load(Ordering::Relaxed) as f64
                    / latency_samples as f64
            },
            request_rate: if uptime.as_secs_f64() > 0.0 {
                self.totals.requests.load(Ordering::Relaxed) as f64 / uptime.as_secs_f64()
            } else {
                0.0
            },
            uptime_ms: uptime.as_millis() as u64,
            last_failure_ms_ago: last_failure.map(|at| at.elapsed().as_millis() as u64),
            last_success_ms_ago: last_success.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    fn spawn_monitor(breaker: &Arc<Self>, mut stop: watch::Receiver<bool>) {
        let weak = Arc::downgrade(breaker);
        let interval = Duration::from_millis(breaker.config.monitor_interval_ms);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(breaker) = weak.upgrade() else { break };
                        breaker.health_check();
                    }
                    _ = stop.changed() => break,
                }
            }
        });
    }

    /// Observational only: alerts never change the state machine.
    fn health_check(&self) {
        let snapshot = self.metrics();
        let executed = snapshot.successful_requests + snapshot.failed_requests;

        if executed > 0 && snapshot.failure_rate > FAILURE_RATE_ALERT_THRESHOLD {
            tracing::warn!(
                operation = %self.operation,
                failure_rate = snapshot.failure_rate,
                "high failure rate"
            );
            self.events.emit(Event::HighFailureRate {
                operation: self.operation.clone(),
                failure_rate: snapshot.failure_rate,
                threshold: FAILURE_RATE_ALERT_THRESHOLD,
            });
        }

        if snapshot.average_response_ms > RESPONSE_TIME_ALERT_THRESHOLD_MS {
            tracing::warn!(
                operation = %self.operation,
                average_response_ms = snapshot.average_response_ms,
                "high average response time"
            );
            self.events.emit(Event::HighResponseTime {
                operation: self.operation.clone(),
                average_ms: snapshot.average_response_ms,
                threshold_ms: RESPONSE_TIME_ALERT_THRESHOLD_MS,
            });
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}
