//! Tracing setup for the server binary

use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level` when set.
pub fn init_logger(default_level: &str) {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter_layer)
        .try_init();

    if installed.is_ok() {
        info!("tracing configured");
    }
}
