//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/labflow.toml` by default)
//! 2. environment variables prefixed with `LABFLOW_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! LABFLOW_APPLICATION__LOG_LEVEL=debug
//! LABFLOW_STORE__SNAPSHOT_PATH=/var/lib/labflow/store.json
//! LABFLOW_MONITOR__UPDATES_INTERVAL_MS=500
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, LabError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/labflow.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Persistent store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot the store is loaded from and saved to
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

/// Outbound station HTTP settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// URL scheme used to reach station addresses
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Request timeout in milliseconds; unset means no timeout
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Live monitoring stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between status-update polls
    #[serde(default = "default_updates_interval")]
    pub updates_interval_ms: u64,
    /// Delay between run-table polls
    #[serde(default = "default_run_tables_interval")]
    pub run_tables_interval_ms: u64,
    /// First delay after a failed poll
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    /// Upper bound for the backoff delay
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Stop the stream after this many consecutive failures; unset polls forever
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "labflow".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/labflow-store.json")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_updates_interval() -> u64 {
    1000
}

fn default_run_tables_interval() -> u64 {
    10_000
}

fn default_backoff_initial() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    60_000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            request_timeout_ms: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            updates_interval_ms: default_updates_interval(),
            run_tables_interval_ms: default_run_tables_interval(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            max_consecutive_failures: None,
        }
    }
}

impl StationConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from the default path and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// Precedence (highest first): `LABFLOW_` environment variables, the TOML
    /// file, built-in defaults. A missing file is not an error. The result is
    /// validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABFLOW_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if !["http", "https"].contains(&self.station.scheme.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid station scheme '{}'. Must be http or https",
                self.station.scheme
            )));
        }

        if self.station.request_timeout_ms == Some(0) {
            return Err(LabError::Configuration(
                "request_timeout_ms must be > 0 when set".to_string(),
            ));
        }

        let monitor = &self.monitor;
        if monitor.updates_interval_ms == 0 || monitor.run_tables_interval_ms == 0 {
            return Err(LabError::Configuration(
                "Monitor poll intervals must be > 0".to_string(),
            ));
        }
        if monitor.backoff_initial_ms == 0 || monitor.backoff_initial_ms > monitor.backoff_max_ms {
            return Err(LabError::Configuration(format!(
                "Invalid backoff window {}..{} ms",
                monitor.backoff_initial_ms, monitor.backoff_max_ms
            )));
        }
        if monitor.max_consecutive_failures == Some(0) {
            return Err(LabError::Configuration(
                "max_consecutive_failures must be > 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.monitor.updates_interval_ms, 1000);
        assert_eq!(settings.monitor.run_tables_interval_ms, 10_000);
        assert_eq!(settings.station.request_timeout(), None);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();

        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_backoff_window() {
        let mut settings = Settings::default();
        settings.monitor.backoff_initial_ms = 5000;
        settings.monitor.backoff_max_ms = 100;

        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid backoff window"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut settings = Settings::default();
        settings.monitor.run_tables_interval_ms = 0;
        assert!(settings.validate().is_err());
    }
}
