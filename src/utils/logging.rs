//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter driven by [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{BrokerError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Fails with `ConfigError` if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| BrokerError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
