//! Tracing setup for the engine and its binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `tracing` subscriber with an `EnvFilter` driven by
/// `RUST_LOG`, defaulting to `info,alert_publisher=debug` when unset.
///
/// Idempotent-enough for tests: subsequent calls after the first are no-ops
/// because `try_init` swallows the "already set" error.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,alert_publisher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
