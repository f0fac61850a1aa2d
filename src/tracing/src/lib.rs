//! Logging setup.
//!
//! The gateway logs exclusively through the `tracing` macros; nothing in the
//! core ever calls `println!`/`eprintln!`. `init` installs a global
//! subscriber once, at process start, driven by a default directive plus the
//! `NDG_LOG` environment variable.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;

/// Logging configuration, as carried on Gateway Settings.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Default level when `NDG_LOG` is unset (e.g. `"info"`).
    pub default_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            default_level: "info".to_string(),
        }
    }
}

/// Installs the global tracing subscriber. Must be called exactly once,
/// before any other component logs.
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("NDG_LOG")
        .or_else(|_| EnvFilter::try_new(&settings.default_level))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
