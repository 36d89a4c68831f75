//! Configuration management for flock
//!
//! Settings come from a TOML file or from `FLOCK_*` environment variables
//! layered over the defaults, and are always validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub timeline: TimelineConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// How long in-flight requests get to finish after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Key-value store connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL of the remote store
    pub url: String,

    /// Upper bound on concurrently checked-out connections
    pub max_connections: u32,

    /// Idle connections the pool tries to keep warm
    pub min_idle: u32,

    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// How long `acquire` waits for a free connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Socket read/write timeout applied to every pooled connection
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

/// Timeline read and fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Posts per timeline page served over HTTP
    pub page_size: u32,

    /// Deadline for assembling one timeline page
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Followers enumerated (and committed) per fan-out batch
    pub fanout_batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Prometheus scrape endpoint
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 1000,
            min_idle: 10,
            idle_timeout: Duration::from_secs(240),
            connection_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            fetch_timeout: Duration::from_secs(1),
            fanout_batch_size: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `FLOCK_<SECTION>_<KEY>`, for example
    /// `FLOCK_STORE_URL=redis://cache:6379`. Durations use humantime syntax
    /// (`FLOCK_TIMELINE_FETCH_TIMEOUT=750ms`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("FLOCK_SERVER_BIND_ADDRESS") {
            config.server.bind_address = parse_value("FLOCK_SERVER_BIND_ADDRESS", &v)?;
        }
        if let Some(v) = lookup("FLOCK_SERVER_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = parse_duration("FLOCK_SERVER_SHUTDOWN_TIMEOUT", &v)?;
        }

        if let Some(v) = lookup("FLOCK_STORE_URL") {
            config.store.url = v;
        }
        if let Some(v) = lookup("FLOCK_STORE_MAX_CONNECTIONS") {
            config.store.max_connections = parse_value("FLOCK_STORE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("FLOCK_STORE_MIN_IDLE") {
            config.store.min_idle = parse_value("FLOCK_STORE_MIN_IDLE", &v)?;
        }
        if let Some(v) = lookup("FLOCK_STORE_CONNECTION_TIMEOUT") {
            config.store.connection_timeout = parse_duration("FLOCK_STORE_CONNECTION_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FLOCK_STORE_IDLE_TIMEOUT") {
            config.store.idle_timeout = parse_duration("FLOCK_STORE_IDLE_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FLOCK_STORE_IO_TIMEOUT") {
            config.store.io_timeout = parse_duration("FLOCK_STORE_IO_TIMEOUT", &v)?;
        }

        if let Some(v) = lookup("FLOCK_TIMELINE_PAGE_SIZE") {
            config.timeline.page_size = parse_value("FLOCK_TIMELINE_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("FLOCK_TIMELINE_FETCH_TIMEOUT") {
            config.timeline.fetch_timeout = parse_duration("FLOCK_TIMELINE_FETCH_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FLOCK_TIMELINE_FANOUT_BATCH_SIZE") {
            config.timeline.fanout_batch_size =
                parse_value("FLOCK_TIMELINE_FANOUT_BATCH_SIZE", &v)?;
        }

        if let Some(v) = lookup("FLOCK_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("FLOCK_LOG_JSON") {
            config.logging.json_format = parse_value("FLOCK_LOG_JSON", &v)?;
        }

        if let Some(v) = lookup("FLOCK_METRICS_ENABLED") {
            config.metrics.enabled = parse_value("FLOCK_METRICS_ENABLED", &v)?;
        }
        if let Some(v) = lookup("FLOCK_METRICS_BIND_ADDRESS") {
            config.metrics.bind_address = parse_value("FLOCK_METRICS_BIND_ADDRESS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.url.is_empty() {
            return Err(ConfigError::ValidationFailed("store.url must not be empty".to_string()));
        }

        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.max_connections must be greater than 0".to_string(),
            ));
        }

        if self.store.min_idle > self.store.max_connections {
            return Err(ConfigError::ValidationFailed(format!(
                "store.min_idle ({}) exceeds store.max_connections ({})",
                self.store.min_idle, self.store.max_connections
            )));
        }

        if self.timeline.page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeline.page_size must be greater than 0".to_string(),
            ));
        }

        if self.timeline.fetch_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "timeline.fetch_timeout must be non-zero".to_string(),
            ));
        }

        if self.timeline.fanout_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeline.fanout_batch_size must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        }
    })
}
