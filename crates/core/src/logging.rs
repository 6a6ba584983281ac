//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,kiln=debug";

/// Initialize the logging system with tracing.
///
/// Filtering follows `RUST_LOG` when present and falls back to
/// `info,kiln=debug`, which keeps frame-level `trace!` output quiet.
///
/// # Example
/// ```
/// kiln_core::init_logging();
/// tracing::info!("Frame loop starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
