//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` overrides the
//! configured level when present.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{CoreError, Result};

/// Install the global subscriber described by `config`.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.log_level.to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .map_err(|e| CoreError::ConfigError(format!("Invalid log filter: {e}")))?;

    let installed = if config.json_format {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_target(true)
            .try_init()
            .is_ok()
    };

    if installed {
        info!(app = %config.app_name, level = %level, json = config.json_format, "Logging initialised");
    }
    Ok(())
}
