//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber with a sensible default filter
//! - Let the environment (`RUST_LOG`) override the configured level
//!
//! # Design Decisions
//! - `try_init` so an embedding application's subscriber always wins
//! - Default filter scopes to this crate; dependencies stay quiet unless
//!   asked for explicitly

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `level` applies to this crate's targets; `RUST_LOG` takes precedence
/// when set. A no-op if a subscriber is already installed.
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("resilient_client={level}").into());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if !installed {
        tracing::debug!("tracing subscriber already installed; keeping it");
    }
}
