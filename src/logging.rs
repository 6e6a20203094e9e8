//! Structured logging initialization

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from logging configuration.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// raise verbosity without touching config files.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("invalid log filter {:?}: {}", config.level, e))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format {
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?,
        LogFormat::Pretty => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?,
    }

    Ok(())
}
