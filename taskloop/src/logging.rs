//! Diagnostic tracing for taskloop processes.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is
//! separate from the vault's audit log under `Logs/`, which is always
//! written and unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Defaults to `info` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=taskloop=debug taskloop work --watch
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
