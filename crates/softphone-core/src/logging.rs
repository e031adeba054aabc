//! Logging bootstrap
//!
//! Library code only emits `tracing` events. A binary installs the subscriber
//! once with [`setup_logging`]. Without `RUST_LOG` the configured level applies
//! to this crate and the binary itself while everything else stays at `warn`;
//! a `RUST_LOG` value replaces those defaults entirely.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{SoftphoneError, SoftphoneResult};

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line on stdout
    Json,
}

/// Logging settings for a softphone process
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Binary name; dashes become underscores for its filter target
    pub app_name: String,
}

impl LoggingConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            app_name: app_name.into(),
        }
    }

    /// Settings from command-line style values
    pub fn from_args(app_name: impl Into<String>, level: &str, json: bool) -> SoftphoneResult<Self> {
        let level = Level::from_str(level).map_err(|_| SoftphoneError::config(format!("Invalid log level: {level}")))?;
        Ok(Self {
            level,
            format: if json { LogFormat::Json } else { LogFormat::Text },
            app_name: app_name.into(),
        })
    }

    /// Default filter directives when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let app_target = self.app_name.replace('-', "_");
        format!("warn,rvoip_softphone_core={level},{app_target}={level}")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn setup_logging(config: &LoggingConfig) -> SoftphoneResult<()> {
    let builder = fmt::Subscriber::builder().with_env_filter(config.filter());

    let installed = match config.format {
        LogFormat::Json => builder.with_writer(std::io::stdout).json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| SoftphoneError::config(format!("Failed to install logging: {e}")))
}

/// First line of every run
pub fn log_welcome(config: &LoggingConfig, version: &str) {
    tracing::info!(app = %config.app_name, version, format = ?config.format, "Starting");
}
