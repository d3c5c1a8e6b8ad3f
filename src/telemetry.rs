//! Tracing setup for binaries and demos embedding the pipeline.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a formatted stderr subscriber honoring `RUST_LOG`, defaulting
/// to `info` for this crate.
///
/// Safe to call more than once; later calls are no-ops because a global
/// subscriber can only be installed once per process.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pagesage=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
