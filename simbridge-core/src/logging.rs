//! Subscriber setup for hosts that want simbridge's `tracing` output.

use tracing::Level;

use crate::config::{LogFormat, LogLevel, LoggingConfig};
use crate::error::{Error, Result};

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Install a global fmt subscriber.
///
/// Fails with `Runtime` if the process already has a global subscriber.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(Level::from(config.level))
        .with_target(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| Error::runtime(format!("logging already initialized: {}", e)))
}
