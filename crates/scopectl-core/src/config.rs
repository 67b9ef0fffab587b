/*!
 * Configuration management for scopectl.
 *
 * Settings are layered: built-in defaults, then an optional TOML file, then
 * environment variables carrying a prefix (`SCOPECTL__STAGE__PORT=COM3`).
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Camera adapter configuration
    #[serde(default)]
    pub camera: CameraConfig,

    /// Stage adapter configuration
    #[serde(default)]
    pub stage: StageConfig,

    /// Illumination adapter configuration
    #[serde(default)]
    pub illumination: IlluminationConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Setup name (development, qstate, prism2, ...)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,

    /// Whether to print the event target
    #[serde(default = "default_true")]
    pub with_target: bool,
}

/// Camera adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Interval between frame polls in milliseconds
    #[serde(default = "default_camera_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Stage adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Serial port of the stage controller
    #[serde(default = "default_stage_port")]
    pub port: String,

    /// Interval between position polls in milliseconds
    #[serde(default = "default_stage_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Illumination adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IlluminationConfig {
    /// DAQ board name; empty means the profile's own board
    #[serde(default)]
    pub board: String,

    /// Shutter profile name ("qstate" or "prism2")
    #[serde(default = "default_shutter_profile")]
    pub profile: String,

    /// How long the command thread waits for a command before checking for shutdown
    #[serde(default = "default_command_poll_ms")]
    pub command_poll_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_camera_poll_ms(),
        }
    }
}

impl CameraConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            port: default_stage_port(),
            poll_interval_ms: default_stage_poll_ms(),
        }
    }
}

impl StageConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for IlluminationConfig {
    fn default() -> Self {
        Self {
            board: String::new(),
            profile: default_shutter_profile(),
            command_poll_ms: default_command_poll_ms(),
        }
    }
}

impl IlluminationConfig {
    /// Command poll interval as a duration
    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }
}

impl Config {
    /// Serialize the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_app_name() -> String {
    "scopectl".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_camera_poll_ms() -> u64 {
    10
}

fn default_stage_port() -> String {
    "COM1".to_string()
}

fn default_stage_poll_ms() -> u64 {
    500
}

fn default_shutter_profile() -> String {
    "qstate".to_string()
}

fn default_command_poll_ms() -> u64 {
    100
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
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

    /// Replace whatever was loaded with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let mut config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        if let Some(override_config) = self.override_with {
            config = override_config;
        }

        info!(environment = %config.general.environment, "Configuration loaded");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
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
