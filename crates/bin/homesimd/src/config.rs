//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `homesim.toml` in the working directory, or at the path named by
//! `HOMESIM_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "homesim.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Document store settings.
    pub storage: StorageConfig,
    /// Sensor simulation settings.
    pub simulator: SimulatorConfig,
    /// Outbound webhook settings.
    pub webhooks: WebhooksConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// JSON document store configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// File holding every device and API key.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Seconds between two readings of a simulated device.
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    /// Seconds before a webhook delivery is abandoned.
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from the config file (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HOMESIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Apply `HOMESIM_*` overrides looked up through `var`. Unparsable
    /// numbers are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("HOMESIM_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("HOMESIM_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("HOMESIM_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.server.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = var("HOMESIM_STORAGE_PATH") {
            self.storage.path = PathBuf::from(val);
        }
        if let Some(secs) = var("HOMESIM_SIMULATOR_INTERVAL_SECS").and_then(|val| val.parse().ok())
        {
            self.simulator.interval_secs = secs;
        }
        if let Some(secs) = var("HOMESIM_WEBHOOK_TIMEOUT_SECS").and_then(|val| val.parse().ok()) {
            self.webhooks.timeout_secs = secs;
        }
        if let Some(val) = var("HOMESIM_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.simulator.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "simulator interval must be non-zero".to_string(),
            ));
        }
        if self.webhooks.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "webhook timeout must be non-zero".to_string(),
            ));
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn simulator_interval(&self) -> Duration {
        Duration::from_secs(self.simulator.interval_secs)
    }

    #[must_use]
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhooks.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/homesim.json"),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homesimd=info,homesim=info,tower_http=debug".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
