//! HTTP execution engine with agent pooling, transport retries, and
//! health telemetry.
//!
//! # Responsibilities
//! - Route each request to the pooled agent for its destination
//! - Retry transient transport failures with exponential backoff + jitter
//! - Track reuse/failure/latency statistics and emit periodic health events
//! - Release every pooled resource on destroy
//!
//! # Design Decisions
//! - Agent creation is idempotent: concurrent first-requests to one host
//!   converge on a single agent (compute-if-absent, first writer wins)
//! - Retries are bounded by an attempt budget, not a wall-clock deadline;
//!   callers wanting a deadline wrap the call in their own timeout
//! - HTTP status codes are returned as data, never retried here

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::ConnectionConfig;
use crate::connection::agent::{Agent, AgentKey, Protocol};
use crate::connection::dns::DnsCache;
use crate::error::RequestError;
use crate::events::{Event, EventBus};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Connection reuse rate (percent) below which the monitor raises an alert.
const REUSE_RATE_ALERT_THRESHOLD: f64 = 70.0;

/// An HTTP request to execute against a pooled destination.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub protocol: Protocol,
    /// Host, or host:port for non-default ports.
    pub authority: String,
    /// Request path; a leading slash is added if missing.
    pub path: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    pub fn new(
        method: reqwest::Method,
        protocol: Protocol,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            authority: authority.into(),
            path: path.into(),
            method,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(protocol: Protocol, authority: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(reqwest::Method::GET, protocol, authority, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Split the authority into host and port, defaulting the port from the
    /// protocol.
    fn host_port(&self) -> Result<(&str, u16), RequestError> {
        if self.authority.is_empty() {
            return Err(RequestError::InvalidRequest("empty authority".into()));
        }
        match self.authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    RequestError::InvalidRequest(format!(
                        "invalid port in authority '{}'",
                        self.authority
                    ))
                })?;
                Ok((host, port))
            }
            None => Ok((self.authority.as_str(), self.protocol.default_port())),
        }
    }

    fn url(&self) -> Result<url::Url, RequestError> {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        url::Url::parse(&format!(
            "{}://{}{}",
            self.protocol.scheme(),
            self.authority,
            path
        ))
        .map_err(|e| RequestError::InvalidRequest(format!("unparsable request target: {e}")))
    }
}

/// Per-request execution metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    /// Attempts spent, first try included.
    pub attempts: u32,
    /// Total latency across all attempts, milliseconds.
    pub latency_ms: u64,
    /// Negotiated HTTP version of the final attempt.
    pub http_version: String,
}

/// Outcome of a successfully transported request. The HTTP status may still
/// be an error; interpreting it belongs to the caller.
#[derive(Debug)]
pub struct ExecutedRequest {
    pub status: reqwest::StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
    pub metrics: RequestMetrics,
}

/// Snapshot of pool-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub total_requests: u64,
    pub reuse_count: u64,
    pub failure_count: u64,
    pub average_latency_ms: f64,
    pub http1_responses: u64,
    pub http2_responses: u64,
    pub active_agents: usize,
    pub reuse_rate: f64,
    pub dns_entries: usize,
}

#[derive(Debug, Default)]
struct Stats {
    total_requests: AtomicU64,
    reuse_count: AtomicU64,
    failure_count: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_samples: AtomicU64,
    http1_responses: AtomicU64,
    http2_responses: AtomicU64,
}

/// One attempt's failure; decides retryability.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("dns resolution failed: {0}")]
    Dns(#[from] std::io::Error),
    #[error(transparent)]
    Transport(reqwest::Error),
}

impl AttemptError {
    fn retryable(&self) -> bool {
        match self {
            AttemptError::Dns(_) => true,
            AttemptError::Transport(e) => e.is_connect() || e.is_timeout(),
        }
    }

    fn into_source(self) -> Box<dyn std::error::Error + Send + Sync> {
        match self {
            AttemptError::Dns(e) => Box::new(e),
            AttemptError::Transport(e) => Box::new(e),
        }
    }
}

struct AttemptSuccess {
    status: reqwest::StatusCode,
    headers: reqwest::header::HeaderMap,
    version: reqwest::Version,
    body: Vec<u8>,
}

/// Pools transport agents per destination and executes requests with
/// retry, backoff, and continuous self-monitoring.
pub struct ConnectionManager {
    config: ConnectionConfig,
    agents: DashMap<AgentKey, Arc<Agent>>,
    dns: DnsCache,
    stats: Stats,
    events: EventBus,
    monitor_stop: watch::Sender<bool>,
    destroyed: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager and spawn its health monitor task (when the
    /// configured interval is non-zero; requires a tokio runtime).
    pub fn new(config: ConnectionConfig, events: EventBus) -> Arc<Self> {
        let (monitor_stop, stop_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            config,
            agents: DashMap::new(),
            dns: DnsCache::new(),
            stats: Stats::default(),
            events,
            monitor_stop,
            destroyed: AtomicBool::new(false),
        });

        if manager.config.monitor_interval_ms > 0 {
            Self::spawn_monitor(&manager, stop_rx);
        }

        manager
    }

    /// The pooled agent for a destination, created on first use.
    ///
    /// All callers for the same (protocol, authority) receive the identical
    /// agent instance; a creation race converges on the first insert.
    pub fn agent(&self, protocol: Protocol, authority: &str) -> Result<Arc<Agent>, RequestError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RequestError::Destroyed);
        }

        let key = AgentKey {
            protocol,
            authority: authority.to_string(),
        };

        if let Some(existing) = self.agents.get(&key) {
            self.mark_reuse(&key);
            return Ok(existing.clone());
        }

        match self.agents.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                // lost the creation race; reuse the winner's agent
                self.mark_reuse(&key);
                Ok(entry.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let agent = Arc::new(Agent::new(key.clone(), &self.config)?);
                entry.insert(agent.clone());
                tracing::debug!(destination = %key, "transport agent created");
                self.events.emit(Event::AgentCreated {
                    protocol: protocol.to_string(),
                    authority: key.authority,
                });
                Ok(agent)
            }
        }
    }

    fn mark_reuse(&self, key: &AgentKey) {
        self.stats.reuse_count.fetch_add(1, Ordering::Relaxed);
        self.events.emit(Event::ConnectionReused {
            protocol: key.protocol.to_string(),
            authority: key.authority.clone(),
        });
    }

    /// Execute a request with pooling and transport-level retries.
    ///
    /// Transient failures (DNS, connect, timeout) retry up to the attempt
    /// budget with exponential backoff and jitter; after exhaustion the last
    /// cause is surfaced as one terminal [`RequestError::Exhausted`].
    pub async fn execute_request(
        &self,
        spec: RequestSpec,
    ) -> Result<ExecutedRequest, RequestError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RequestError::Destroyed);
        }

        let (host, port) = spec.host_port()?;
        let host = host.to_string();
        let url = spec.url()?;
        let agent = self.agent(spec.protocol, &spec.authority)?;

        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let budget = self.config.retry_attempts.max(1);
        let started = Instant::now();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(&agent, &spec, &host, port, url.clone()).await {
                Ok(success) => {
                    let latency = started.elapsed();
                    return Ok(self.finish_success(&spec, success, attempt, latency));
                }
                Err(cause) if attempt < budget && cause.retryable() => {
                    let delay = calculate_backoff(
                        attempt,
                        self.config.base_delay_ms,
                        self.config.max_delay_ms,
                        self.config.jitter_ms,
                    );
                    tracing::warn!(
                        authority = %spec.authority,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "transport attempt failed; retrying"
                    );
                    metrics::record_transport_retry(&spec.authority);
                    self.events.emit(Event::RequestRetry {
                        authority: spec.authority.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    time::sleep(delay).await;
                }
                Err(cause) => {
                    self.stats.failure_count.fetch_add(1, Ordering::Relaxed);
                    metrics::record_transport_request(&spec.authority, "failure", started.elapsed());
                    tracing::error!(
                        authority = %spec.authority,
                        attempts = attempt,
                        error = %cause,
                        "transport attempts exhausted"
                    );
                    self.events.emit(Event::RequestFailed {
                        authority: spec.authority.clone(),
                        attempts: attempt,
                        error: cause.to_string(),
                    });
                    return Err(RequestError::Exhausted {
                        attempts: attempt,
                        source: cause.into_source(),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        agent: &Agent,
        spec: &RequestSpec,
        host: &str,
        port: u16,
        url: url::Url,
    ) -> Result<AttemptSuccess, AttemptError> {
        // fail fast on resolution problems before touching the socket pool
        self.dns.resolve(host, port).await?;

        let mut request = agent.client().request(spec.method.clone(), url);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }
        agent.record_request();

        let response = request.send().await.map_err(AttemptError::Transport)?;
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(AttemptError::Transport)?
            .to_vec();

        Ok(AttemptSuccess {
            status,
            headers,
            version,
            body,
        })
    }

    fn finish_success(
        &self,
        spec: &RequestSpec,
        success: AttemptSuccess,
        attempts: u32,
        latency: Duration,
    ) -> ExecutedRequest {
        let latency_ms = latency.as_millis() as u64;
        self.stats
            .latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.stats.latency_samples.fetch_add(1, Ordering::Relaxed);

        let http_version = match success.version {
            reqwest::Version::HTTP_2 => {
                self.stats.http2_responses.fetch_add(1, Ordering::Relaxed);
                "h2".to_string()
            }
            other => {
                self.stats.http1_responses.fetch_add(1, Ordering::Relaxed);
                format!("{other:?}")
            }
        };

        metrics::record_transport_request(&spec.authority, "success", latency);
        tracing::debug!(
            authority = %spec.authority,
            status = success.status.as_u16(),
            attempts,
            latency_ms,
            "request executed"
        );
        self.events.emit(Event::RequestExecuted {
            authority: spec.authority.clone(),
            status: success.status.as_u16(),
            attempts,
            latency_ms,
            http_version: http_version.clone(),
        });

        ExecutedRequest {
            status: success.status,
            headers: success.headers,
            body: success.body,
            metrics: RequestMetrics {
                attempts,
                latency_ms,
                http_version,
            },
        }
    }

    /// Reuse rate as a percentage, clamped to [0, 100].
    pub fn connection_reuse_rate(&self) -> f64 {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let reused = self.stats.reuse_count.load(Ordering::Relaxed);
        ((reused as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Invalidate every cached DNS resolution.
    pub fn clear_dns_cache(&self) {
        let entries = self.dns.clear();
        tracing::info!(entries, "dns cache cleared");
        self.events.emit(Event::DnsCacheCleared { entries });
    }

    /// Live agents in the pool.
    pub fn active_agents(&self) -> usize {
        self.agents.len()
    }

    /// Snapshot of pool-wide statistics.
    pub fn metrics(&self) -> ConnectionMetrics {
        let samples = self.stats.latency_samples.load(Ordering::Relaxed);
        ConnectionMetrics {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            reuse_count: self.stats.reuse_count.load(Ordering::Relaxed),
            failure_count: self.stats.failure_count.load(Ordering::Relaxed),
            average_latency_ms: if samples == 0 {
                0.0
            } else {
                self.stats.latency_sum_ms.load(Ordering::Relaxed) as f64 / samples as f64
            },
            http1_responses: self.stats.http1_responses.load(Ordering::Relaxed),
            http2_responses: self.stats.http2_responses.load(Ordering::Relaxed),
            active_agents: self.agents.len(),
            reuse_rate: self.connection_reuse_rate(),
            dns_entries: self.dns.len(),
        }
    }

    /// Shut down: close every pooled agent, stop the monitor, reject
    /// further requests. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.monitor_stop.send(true);

        let closed = self.agents.len();
        self.agents.clear();
        tracing::info!(closed_agents = closed, "connection manager destroyed");
        self.events.emit(Event::Destroyed {
            component: "connection_manager",
        });
    }

    fn spawn_monitor(manager: &Arc<Self>, mut stop: watch::Receiver<bool>) {
        let weak = Arc::downgrade(manager);
        let interval = Duration::from_millis(manager.config.monitor_interval_ms);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.health_check();
                    }
                    _ = stop.changed() => break,
                }
            }
        });
    }

    /// Observational only; emitted every interval regardless of load.
    fn health_check(&self) {
        let snapshot = self.metrics();
        let failure_rate = if snapshot.total_requests == 0 {
            0.0
        } else {
            (snapshot.failure_count as f64 / snapshot.total_requests as f64) * 100.0
        };

        self.events.emit(Event::HealthCheck {
            reuse_rate: snapshot.reuse_rate,
            failure_rate,
            average_latency_ms: snapshot.average_latency_ms,
            active_agents: snapshot.active_agents,
        });

        // undefined with no traffic; skip the alert until requests exist
        if snapshot.total_requests > 0 && snapshot.reuse_rate < REUSE_RATE_ALERT_THRESHOLD {
            tracing::warn!(
                reuse_rate = snapshot.reuse_rate,
                "connection reuse rate below threshold"
            );
            self.events.emit(Event::PerformanceAlert {
                kind: "lowReuseRate",
                value: snapshot.reuse_rate,
                threshold: REUSE_RATE_ALERT_THRESHOLD,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_splits_authority() {
        let spec = RequestSpec::get(Protocol::Http, "127.0.0.1:8080", "/health");
        assert_eq!(spec.host_port().unwrap(), ("127.0.0.1", 8080));

        let spec = RequestSpec::get(Protocol::Https, "api.example.com", "/v1");
        assert_eq!(spec.host_port().unwrap(), ("api.example.com", 443));
    }

    #[test]
    fn host_port_rejects_garbage() {
        let spec = RequestSpec::get(Protocol::Http, "host:notaport", "/");
        assert!(spec.host_port().is_err());

        let spec = RequestSpec::get(Protocol::Http, "", "/");
        assert!(spec.host_port().is_err());
    }

    #[test]
    fn url_adds_missing_leading_slash() {
        let spec = RequestSpec::get(Protocol::Http, "example.com", "status");
        assert_eq!(spec.url().unwrap().as_str(), "http://example.com/status");
    }

    #[tokio::test]
    async fn destroyed_manager_rejects_requests() {
        let manager = ConnectionManager::new(
            ConnectionConfig {
                monitor_interval_ms: 0,
                ..ConnectionConfig::default()
            },
            EventBus::default(),
        );
        manager.destroy();

        let err = manager
            .execute_request(RequestSpec::get(Protocol::Http, "127.0.0.1:1", "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Destroyed));
        assert_eq!(manager.active_agents(), 0);
    }
}
