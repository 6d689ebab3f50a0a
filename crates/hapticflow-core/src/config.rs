/*!
 * Configuration management for HapticFlow.
 *
 * This module provides functionality to load and access configuration
 * settings for HapticFlow components. Sources are layered: built-in defaults,
 * then an optional TOML file, then prefixed environment variables.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for HapticFlow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device and discovery configuration
    #[serde(default)]
    pub devices: DeviceConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Server name announced in the handshake
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Ping deadline in milliseconds announced in the handshake (0 disables)
    #[serde(default)]
    pub max_ping_time_ms: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_log_target")]
    pub with_target: bool,
}

/// Device and discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stop scanning automatically after this many milliseconds (0 scans until told to stop)
    #[serde(default)]
    pub scan_timeout_ms: u64,

    /// Deadline for resolving a matched peripheral's characteristics
    #[serde(default = "default_characteristic_timeout_ms")]
    pub characteristic_timeout_ms: u64,

    /// Deadline for a device's one-time initialization
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,
}

impl DeviceConfig {
    /// Scan deadline, if one is configured
    pub fn scan_timeout(&self) -> Option<Duration> {
        (self.scan_timeout_ms > 0).then(|| Duration::from_millis(self.scan_timeout_ms))
    }

    /// Characteristic resolution deadline
    pub fn characteristic_timeout(&self) -> Duration {
        Duration::from_millis(self.characteristic_timeout_ms)
    }

    /// Initialization deadline
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            max_ping_time_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_log_target(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 0,
            characteristic_timeout_ms: default_characteristic_timeout_ms(),
            initialize_timeout_ms: default_initialize_timeout_ms(),
        }
    }
}

fn default_server_name() -> String {
    "hapticflow".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> bool {
    true
}

fn default_characteristic_timeout_ms() -> u64 {
    5_000
}

fn default_initialize_timeout_ms() -> u64 {
    5_000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        config_builder = config_builder.add_source(
            ConfigLib::try_from(&Config::default())
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::from(path));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}
