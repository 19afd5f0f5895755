//! Application configuration
//!
//! Defaults, then an optional TOML file, then `SIGNAL_*` environment
//! variables (`SIGNAL_SERVER__BIND_ADDR`, `SIGNAL_ENGINE__MIN_GREEN`, ...).

use crate::rate_limit::RateLimitConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use signal_coordinator::EngineConfig;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{debug, info, Level};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "signal-engine.toml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "SIGNAL_ENGINE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Quota for operator control routes
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

impl AppConfig {
    /// Load from `SIGNAL_ENGINE_CONFIG` or the default file name
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from_file(path)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let rate = RateLimitConfig::default();
        let settings = Config::builder()
            .set_default("server.bind_addr", default_bind_addr())?
            .set_default("server.rate_limit.per_second", rate.per_second as i64)?
            .set_default("server.rate_limit.burst_size", rate.burst_size as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("SIGNAL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Invalid bind address: {}",
                self.server.bind_addr
            )));
        }

        if self.server.rate_limit.per_second == 0 || self.server.rate_limit.burst_size == 0 {
            return Err(ConfigError::Message(
                "Rate limit per_second and burst_size must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<Level>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.engine.min_green, 15);
        assert_eq!(config.engine.max_green, 120);
        assert_eq!(config.logging.level(), Level::INFO);
    }

    #[test]
    fn test_file_overrides() {
        let path = std::env::temp_dir().join(format!("signal-engine-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[engine]
min_green = 10
max_green = 90
congestion_threshold = 30

[[engine.locations]]
id = "main-and-5th"
directions = ["north", "south"]

[server]
bind_addr = "127.0.0.1:9090"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.engine.min_green, 10);
        assert_eq!(config.engine.congestion_threshold, 30);
        // unset keys keep their defaults
        assert_eq!(config.engine.override_duration_secs, 60);
        assert_eq!(config.engine.locations.len(), 1);
        assert_eq!(config.server.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.logging.level(), Level::DEBUG);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.engine.min_green = 200;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.bind_addr = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
