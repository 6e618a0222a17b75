//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller work, tagged with an operation type:
//!     -> manager.rs (route to the operation's circuit breaker)
//!     -> circuit_breaker.rs (admit, probe, or reject; track outcomes)
//!     -> backoff.rs (delay computation shared with the transport layer)
//! ```
//!
//! # Design Decisions
//! - One breaker per operation type; failures never leak across types
//! - Fail fast while open (no queuing behind a down dependency)
//! - Strict single probe in half-open, held by an RAII slot

pub mod backoff;
pub mod circuit_breaker;
pub mod manager;
