//! Tracing setup for embedders and tests

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a `fmt` subscriber filtered by `SENTINEL_LOG`, then `RUST_LOG`,
/// defaulting to `sentinel_core=info`.
///
/// Safe to call more than once; only the first call installs anything, and an
/// existing global subscriber is left alone.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("SENTINEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("sentinel_core=info"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}
