//! Error taxonomy for the resilience core.
//!
//! Callers receive one of three terminal shapes:
//! - `BreakerError::Open`: synthetic rejection, the work was never invoked
//! - `BreakerError::Upstream`: the work ran and failed; the original cause
//!   is carried verbatim
//! - `RequestError::Exhausted`: the transport layer retried and gave up;
//!   this reaches the breaker as a single failure
//!
//! Transport-transient failures (DNS, connect, timeout) are retried inside
//! the connection manager and never surface individually.

use std::time::Duration;
use thiserror::Error;

/// Maps an error to a stable classification label.
///
/// The label is matched against a breaker's `expected_errors` set: matching
/// failures are recorded in metrics but never move the breaker state
/// (business-expected errors, e.g. a 404 from a read, must not trip the
/// circuit). A `"timeout"` classification additionally bumps the breaker's
/// timeout counter.
pub trait ErrorClassifier {
    fn classification(&self) -> &str;
}

/// Result of executing work through a circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the work was not invoked.
    ///
    /// `time_until_retry` tells the caller how long until the breaker will
    /// admit a recovery probe, so it can back off intelligently.
    #[error("circuit '{operation}' is open; retry in {time_until_retry:?}")]
    Open {
        operation: String,
        time_until_retry: Duration,
    },

    /// The work ran and returned a failure.
    #[error("upstream operation failed")]
    Upstream(#[source] E),
}

impl<E> BreakerError<E> {
    /// True if this is a breaker-open rejection.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Remaining wait before the breaker admits a probe, if rejected.
    pub fn time_until_retry(&self) -> Option<Duration> {
        match self {
            BreakerError::Open {
                time_until_retry, ..
            } => Some(*time_until_retry),
            BreakerError::Upstream(_) => None,
        }
    }

    /// Unwrap the upstream cause, if the work actually ran.
    pub fn into_upstream(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Upstream(e) => Some(e),
        }
    }
}

/// Failures from the pooled HTTP execution engine.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The transport agent for a destination could not be constructed.
    #[error("failed to build transport agent for {authority}")]
    Agent {
        authority: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request specification itself is malformed (bad authority, path).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every transport attempt failed; `source` is the last cause.
    #[error("transport retries exhausted after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The connection manager has been destroyed and accepts no new work.
    #[error("connection manager has been destroyed")]
    Destroyed,
}

impl ErrorClassifier for RequestError {
    fn classification(&self) -> &str {
        match self {
            RequestError::Agent { .. } => "agent",
            RequestError::InvalidRequest(_) => "invalid_request",
            RequestError::Exhausted { .. } => "transport_exhausted",
            RequestError::Destroyed => "destroyed",
        }
    }
}

/// Returned by administrative operations targeting an unregistered
/// operation type.
#[derive(Debug, Error)]
#[error("unknown operation type '{0}'")]
pub struct UnknownOperation(pub String);
