//! Tracing setup.
//!
//! One-call initialization for binaries and integration tests: an
//! env-filtered fmt subscriber plus span traces for error reports.

use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate. Calling it a
/// second time (common in test binaries) is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrun=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
