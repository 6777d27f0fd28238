//! Development-time tracing for debugging the resolver.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of resolver product output.
//!
//! - **Resolution logging (`io/resolution_log`)**: Product artifacts
//!   (`resolution_log.json`, `consultation_<n>.json`). Always written,
//!   unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn`, or `info` when `verbose`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=resolver=debug resolver resolve exectest1.json
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
