//! Pooled transport agents.
//!
//! # Responsibilities
//! - Represent one pooled, reusable transport bound to a (protocol, host)
//!   destination
//! - Tune keep-alive, pool sizing, and HTTP/2 negotiation from config
//!
//! # Design Decisions
//! - One agent per destination; all callers share the same instance so
//!   sockets are reused instead of reopened per request
//! - ALPN prefers HTTP/2 on HTTPS; plain HTTP stays on HTTP/1.1

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::schema::ConnectionConfig;
use crate::error::RequestError;

/// Transport protocol of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// URL scheme for this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Default port when the authority carries none.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(RequestError::InvalidRequest(format!(
                "unsupported protocol '{other}'"
            ))),
        }
    }
}

/// Pool key: one agent per (protocol, authority) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    pub protocol: Protocol,
    /// Host, or host:port when the destination uses a non-default port.
    pub authority: String,
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.authority)
    }
}

/// A pooled, reusable transport bound to one destination.
#[derive(Debug)]
pub struct Agent {
    key: AgentKey,
    client: reqwest::Client,
    created_at: Instant,
    requests: AtomicU64,
}

impl Agent {
    /// Build an agent from the connection configuration.
    pub(crate) fn new(key: AgentKey, config: &ConnectionConfig) -> Result<Self, RequestError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_sockets_per_agent)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .tcp_nodelay(true);

        if config.keep_alive {
            builder = builder.tcp_keepalive(Duration::from_secs(60));
        }
        if config.http2 {
            builder = builder
                .http2_keep_alive_interval(Duration::from_secs(30))
                .http2_keep_alive_timeout(Duration::from_secs(10));
        } else {
            builder = builder.http1_only();
        }

        let client = builder.build().map_err(|source| RequestError::Agent {
            authority: key.authority.clone(),
            source,
        })?;

        Ok(Self {
            key,
            client,
            created_at: Instant::now(),
            requests: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &AgentKey {
        &self.key
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests issued through this agent since creation.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
