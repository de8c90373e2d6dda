//! Diagnostic tracing for the runner.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The progress log
//! and run summary (`io/progress`) are product artifacts and are written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_directive` when unset or
/// invalid. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=taskrunner=debug taskrunner run
/// ```
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
