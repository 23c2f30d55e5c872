//! Tracing bootstrap. The host service calls `init_tracing` once at
//! startup; library code only ever emits events.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber with `RUST_LOG`-style filtering.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
