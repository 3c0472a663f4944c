//! Tracing setup shared by the device daemon and the fleet controller.
//!
//! Level and output format come from `[application]` in the configuration; `RUST_LOG`
//! overrides the level filter when set. Devices usually run `compact` into journald,
//! log shippers want `json`, and `pretty` is for a workstation terminal.
//!
//! # Example
//! ```no_run
//! use edge_sentry::{config::SentryConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SentryConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(device = "dock_a", "Logging ready");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::SentryConfig;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging setup failures.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLevel(String),

    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Resolved subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level, unless `RUST_LOG` says otherwise
    pub level: Level,
    /// Line format
    pub format: OutputFormat,
    /// Annotate events with source file and line
    pub with_file_and_line: bool,
    /// Colour escapes in pretty and compact output
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Settings for `config.application`.
    pub fn from_config(config: &SentryConfig) -> Result<Self, LoggingError> {
        let level = Level::from_str(config.application.log_level.trim())
            .map_err(|_| LoggingError::InvalidLevel(config.application.log_level.clone()))?;
        Ok(Self {
            level,
            format: config.application.log_format,
            // debug and trace carry source locations
            with_file_and_line: level >= Level::DEBUG,
            ..Self::default()
        })
    }
}

/// Install the global subscriber described by `config.application`.
pub fn init_from_config(config: &SentryConfig) -> Result<(), LoggingError> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// A second call is a no-op, so tests and embedding binaries can call it freely.
pub fn init(config: TracingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(LoggingError::Init(e.to_string())),
    }
}
