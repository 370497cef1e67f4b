use std::io;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::TryInitError};

use crate::config::LoggingConfig;

/// Installs the global subscriber, writing to stderr so that stdout stays
/// reserved for the account report. `RUST_LOG` overrides `config.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(io::stderr)
            .with_ansi(false);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer().with_target(false).with_writer(io::stderr);
        registry.with(layer).try_init()
    }
}
