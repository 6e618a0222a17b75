//! Adaptive connection management.
//!
//! # Data Flow
//! ```text
//! execute_request:
//!     -> agent.rs (one pooled transport per protocol+host, created lazily)
//!     -> dns.rs (cached resolution; IP literals bypass lookup)
//!     -> attempt; on transport failure retry with backoff + jitter
//!     -> manager.rs health monitor (reuse rate, latency, alerts)
//! ```
//!
//! # Design Decisions
//! - Transport retries happen here, below the circuit breakers; a breaker
//!   sees at most one terminal failure per call
//! - Only connection-level failures (DNS, connect, timeout) retry; HTTP
//!   status codes are data for the caller to interpret

pub mod agent;
pub mod dns;
pub mod manager;
