//! Logging setup for the command-line driver.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber filtered by `RUST_LOG`, falling back to `default_level`.
///
/// Returns an error if a global subscriber is already installed.
pub fn init(default_level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().with_target(false).with_thread_names(true))
        .try_init()
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
