//! # Configuration Module
//!
//! Handles loading and validating the run configuration from TOML files.
//!
//! Every value has a default, so an empty file (or no file at all) gives the
//! classic run: 5000 mV supply, one logged average per second, five minutes.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Native sampling rate of the PPK2 in the averaging mode, in Hz
pub const NATIVE_SAMPLE_RATE_HZ: u32 = 1024;

/// Lowest supply voltage the PPK2 regulator accepts, in millivolts
pub const MIN_SUPPLY_VOLTAGE_MV: u16 = 800;

/// Highest supply voltage the PPK2 regulator accepts, in millivolts
pub const MAX_SUPPLY_VOLTAGE_MV: u16 = 5000;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub duration: DurationConfig,
}

/// Device and session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Explicit serial port; discovery is skipped when set
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_supply_voltage_mv")]
    pub supply_voltage_mv: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between starting the stream and the first poll
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// A PPK2 can enumerate as two ports, so up to this many are accepted
    #[serde(default = "default_max_ports")]
    pub max_ports: usize,
}

/// CSV logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_logs_per_second")]
    pub logs_per_second: u32,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub average_weighting: AverageWeighting,
}

/// Test duration. A negative `hours` means "use minutes".
#[derive(Debug, Deserialize, Clone)]
pub struct DurationConfig {
    #[serde(default = "default_hours")]
    pub hours: i64,

    #[serde(default = "default_minutes")]
    pub minutes: i64,
}

/// How the running total average weights each new interval
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AverageWeighting {
    /// Weight by the zero-based loop index, counting empty polls
    #[default]
    LoopIndex,
    /// Weight by the number of rows actually logged
    LoggedRows,
}

// Default value functions
fn default_supply_voltage_mv() -> u16 { 5000 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_settle_ms() -> u64 { 1000 }
fn default_max_ports() -> usize { 2 }

fn default_logs_per_second() -> u32 { 1 }
fn default_log_dir() -> String { "./logs".to_string() }

fn default_hours() -> i64 { -1 }
fn default_minutes() -> i64 { 5 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            supply_voltage_mv: default_supply_voltage_mv(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
            max_ports: default_max_ports(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_per_second: default_logs_per_second(),
            log_dir: default_log_dir(),
            average_weighting: AverageWeighting::default(),
        }
    }
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            hours: default_hours(),
            minutes: default_minutes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ppk2_logger::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Test duration in seconds: the larger of the hour and minute settings
    ///
    /// Saturates instead of overflowing; `validate()` rejects such values.
    pub fn duration_seconds(&self) -> i64 {
        self.duration.hours.saturating_mul(3600)
            .max(self.duration.minutes.saturating_mul(60))
    }

    /// Number of polling iterations the acquisition loop runs
    pub fn total_sample_count(&self) -> u64 {
        self.checked_sample_count().unwrap_or(u64::MAX)
    }

    fn checked_sample_count(&self) -> Option<u64> {
        // Any negative setting means "unset"
        let hours = self.duration.hours.max(-1).checked_mul(3600)?;
        let minutes = self.duration.minutes.max(-1).checked_mul(60)?;
        let seconds = u64::try_from(hours.max(minutes).max(0)).ok()?;
        seconds.checked_mul(u64::from(self.logging.logs_per_second))
    }

    /// Fixed sleep between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(1) / self.logging.logs_per_second.max(1)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if let Some(port) = &self.device.port {
            if port.is_empty() {
                return Err(crate::error::Ppk2LoggerError::Config(
                    toml::de::Error::custom("device port cannot be empty when set")
                ));
            }
        }

        if self.device.supply_voltage_mv < MIN_SUPPLY_VOLTAGE_MV
            || self.device.supply_voltage_mv > MAX_SUPPLY_VOLTAGE_MV {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom(format!(
                    "supply_voltage_mv must be between {} and {}",
                    MIN_SUPPLY_VOLTAGE_MV, MAX_SUPPLY_VOLTAGE_MV
                ))
            ));
        }

        if self.device.timeout_ms == 0 || self.device.timeout_ms > 10000 {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 10000")
            ));
        }

        if self.device.settle_ms > 60000 {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("settle_ms must be between 0 and 60000")
            ));
        }

        if self.device.max_ports == 0 {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("max_ports must be greater than 0")
            ));
        }

        if self.logging.logs_per_second == 0
            || self.logging.logs_per_second > NATIVE_SAMPLE_RATE_HZ {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom(format!(
                    "logs_per_second must be between 1 and {}",
                    NATIVE_SAMPLE_RATE_HZ
                ))
            ));
        }

        if self.logging.log_dir.is_empty() {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("log_dir cannot be empty")
            ));
        }

        if self.checked_sample_count().is_none() {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("test duration is too long")
            ));
        }

        if self.duration_seconds() <= 0 {
            return Err(crate::error::Ppk2LoggerError::Config(
                toml::de::Error::custom("test duration must be greater than 0 (set hours or minutes)")
            ));
        }

        Ok(())
    }
}
