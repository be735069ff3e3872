//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/webticks/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/webticks/` (~/.config/webticks/)
//! - State/Logs: `$XDG_STATE_HOME/webticks/` (~/.local/state/webticks/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Tracker configuration
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracker configuration
///
/// Immutable once handed to a [`crate::Tracker`].
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Where batches are POSTed. Relative URLs are resolved against the
    /// current location by the browser adapter.
    #[serde(default = "default_destination_url")]
    pub destination_url: String,

    /// Static application identifier, sent as the `webticks-app-id` header
    #[serde(default)]
    pub app_id: Option<String>,

    /// Log every queued event at info level
    #[serde(default)]
    pub debug: bool,

    /// Milliseconds between automatic flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum number of queued events; the oldest are dropped past this
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            destination_url: default_destination_url(),
            app_id: None,
            debug: false,
            flush_interval_ms: default_flush_interval_ms(),
            max_queue_size: default_max_queue_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TrackerConfig {
    /// Config with the given destination and defaults elsewhere
    pub fn with_destination(url: impl Into<String>) -> Self {
        Self {
            destination_url: url.into(),
            ..Default::default()
        }
    }

    /// Interval of the periodic flush timer
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Transport request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.destination_url.trim().is_empty() {
            return Err(Error::Config(
                "tracker.destination_url must not be empty".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "tracker.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(Error::Config(
                "tracker.max_queue_size must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "tracker.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.app_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::Config(
                "tracker.app_id must not be blank when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_destination_url() -> String {
    "/api/track".to_string()
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.tracker.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/webticks/config.toml` (~/.config/webticks/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("webticks").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/webticks/` (~/.local/state/webticks/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("webticks")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("webticks.log")
    }
}
