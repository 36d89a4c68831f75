//! Logging subsystem for flock
//!
//! Every component logs through `tracing`; this module installs the global
//! subscriber once per process, either as human readable text or JSON.

use crate::config::LoggingConfig;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display when `RUST_LOG` is unset
    pub level: LogLevel,
    pub with_timestamp: bool,
    pub with_target: bool,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        Ok(LogConfig::new(config.level.parse()?)
            .with_timestamp(config.with_timestamp)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
///
/// # Example
/// ```
/// use flock_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_target(false);
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

fn fmt_layer(config: &LogConfig) -> BoxedLayer {
    let target = config.with_target;
    match (config.json_format, config.with_timestamp) {
        (true, true) => fmt::layer().json().with_target(target).boxed(),
        (true, false) => fmt::layer().json().without_time().with_target(target).boxed(),
        (false, true) => fmt::layer().with_target(target).boxed(),
        (false, false) => fmt::layer().without_time().with_target(target).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.with_timestamp);
        assert!(config.with_target);
        assert!(!config.json_format);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_log_config_from_settings() {
        let settings = LoggingConfig {
            level: "warn".to_string(),
            json_format: true,
            with_timestamp: false,
            with_target: true,
        };
        let config = LogConfig::try_from(&settings).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json_format);
        assert!(!config.with_timestamp);
    }

    #[test]
    fn test_log_config_rejects_unknown_level() {
        let settings = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(LogConfig::try_from(&settings).is_err());
    }
}
