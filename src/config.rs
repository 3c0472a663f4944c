//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for both sides of the
//! system: the edge device daemon and the fleet controller. Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/edge_sentry.toml` by default)
//! 2. Environment variables (prefixed with `EDGE_SENTRY_`, `__` separates sections)
//!
//! Every field has a default, so an empty file yields a runnable configuration.
//!
//! # Example
//! ```no_run
//! use edge_sentry::config::SentryConfig;
//!
//! let config = SentryConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), edge_sentry::error::SentryError>(())
//! ```

use crate::error::{AppResult, SentryError};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known port of the device command server.
pub const DEFAULT_PORT: u16 = 8888;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device daemon settings (camera, command server)
    #[serde(default)]
    pub device: DeviceConfig,
    /// Incident recording settings
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Preview frames served by `get_frame`
    #[serde(default)]
    pub preview: PreviewConfig,
    /// Fleet controller settings
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line rendering (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Device daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Address the command server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Command server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Camera index handed to the frame source
    #[serde(default)]
    pub camera_id: u32,
    /// Requested capture width in pixels
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    /// Requested capture height in pixels
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    /// Maximum number of simultaneously served client connections
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Pause between capture cycles in milliseconds
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// Longest request line accepted from a client, in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Execute `reboot`/`power_off` on the host instead of only logging them
    #[serde(default)]
    pub host_actions: bool,
}

/// Recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory receiving finished recordings
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// File extension of recordings (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Seconds a recording continues after the danger condition clears
    #[serde(default = "default_linger_secs")]
    pub linger_secs: u64,
    /// Nominal frame rate written into the recording container
    #[serde(default = "default_fps")]
    pub fps: u32,
}

/// Preview frame configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Preview width in pixels
    #[serde(default = "default_preview_width")]
    pub width: u32,
    /// Preview height in pixels
    #[serde(default = "default_preview_height")]
    pub height: u32,
}

/// Fleet controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Device roster: name -> `host` or `host:port`
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
    /// Port used when a device address carries none
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// Seconds between connection scans
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Receive timeout for one response, in seconds
    #[serde(default = "default_recv_timeout_secs")]
    pub recv_timeout_secs: u64,
    /// Interval between `get_frame` polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Longest response line accepted from a device, in bytes
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

// Default value functions
fn default_name() -> String {
    "Edge Sentry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_max_workers() -> usize {
    20
}

fn default_cycle_delay_ms() -> u64 {
    10
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_linger_secs() -> u64 {
    10
}

fn default_fps() -> u32 {
    15
}

fn default_preview_width() -> u32 {
    200
}

fn default_preview_height() -> u32 {
    150
}

fn default_scan_interval_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_recv_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_response_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            camera_id: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            max_workers: default_max_workers(),
            cycle_delay_ms: default_cycle_delay_ms(),
            max_request_bytes: default_max_request_bytes(),
            host_actions: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            extension: default_extension(),
            linger_secs: default_linger_secs(),
            fps: default_fps(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: default_preview_width(),
            height: default_preview_height(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
            default_port: default_port(),
            scan_interval_secs: default_scan_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            recv_timeout_secs: default_recv_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl RecordingConfig {
    /// Linger window as a `Duration`
    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.linger_secs)
    }
}

impl FleetConfig {
    /// Interval between connection scans
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Bound on a single connect attempt
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Bound on waiting for one response line
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_secs)
    }

    /// Interval between frame polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SentryConfig {
    /// Load configuration from `config/edge_sentry.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `EDGE_SENTRY_`.
    /// Example: `EDGE_SENTRY_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/edge_sentry.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: SentryConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EDGE_SENTRY_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML document (no environment overlay)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: SentryConfig = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SentryError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.max_workers == 0 {
            return Err(SentryError::Configuration(
                "device.max_workers must be at least 1".to_string(),
            ));
        }

        if self.recording.extension.is_empty() || self.recording.extension.contains('.') {
            return Err(SentryError::Configuration(format!(
                "recording.extension '{}' must be a bare extension such as 'mp4'",
                self.recording.extension
            )));
        }

        if self.recording.fps == 0 {
            return Err(SentryError::Configuration(
                "recording.fps must be positive".to_string(),
            ));
        }

        if self.preview.width == 0 || self.preview.height == 0 {
            return Err(SentryError::Configuration(
                "preview dimensions must be non-zero".to_string(),
            ));
        }

        if self.fleet.scan_interval_secs == 0 {
            return Err(SentryError::Configuration(
                "fleet.scan_interval_secs must be positive".to_string(),
            ));
        }

        for (name, address) in &self.fleet.devices {
            if address.trim().is_empty() {
                return Err(SentryError::Configuration(format!(
                    "Device '{}' has an empty address",
                    name
                )));
            }
        }

        Ok(())
    }
}
