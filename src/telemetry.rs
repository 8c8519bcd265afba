//! Logging configuration for Hetki
//!
//! Plain tracing-based logging to stderr. No OTEL - this is a test SDK,
//! not a production service.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with tracing-subscriber
///
/// Filtering follows `RUST_LOG`; without it, `hetki` logs at info and
/// everything else at warn, keeping the orchestrator client libraries
/// quiet during test runs. Safe to call from every test; only the first
/// call installs the subscriber.
pub fn init_logging() {
    let default_filter = || EnvFilter::new("warn,hetki=info");

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
