//! Tracing setup for binaries and examples embedding the service.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate. Safe to call
/// more than once (subsequent calls are no-ops), which keeps tests that
/// share a process from fighting over the global subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatloom=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
