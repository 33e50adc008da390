//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::consent::IntegrationCategoryMappings;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

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
    /// Dispatch engine configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Consent gating defaults
    #[serde(default)]
    pub consent: ConsentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dispatch engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Source write key, used to fetch CDN settings
    #[serde(default)]
    pub write_key: Option<String>,

    /// Base URL of the settings CDN
    #[serde(default)]
    pub cdn_url: Option<String>,

    /// Delivery attempts per event before it is dropped with an error
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// HTTP request timeout in seconds for settings fetches
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            write_key: None,
            cdn_url: None,
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout(),
        }
    }
}

impl AnalyticsConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "analytics.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(write_key) = &self.write_key {
            if write_key.trim().is_empty() {
                return Err(Error::Config(
                    "analytics.write_key must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30
}

/// Consent gating defaults
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConsentConfig {
    /// Hardcoded `integration -> categories` mappings that override CDN data
    #[serde(default)]
    pub integration_category_mappings: Option<IntegrationCategoryMappings>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
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

        config.analytics.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/beacon/beacon.log` (~/.local/state/beacon/beacon.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("beacon.log")
    }
}
