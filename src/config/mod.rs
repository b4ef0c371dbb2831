//! Configuration management for pbm-core

use crate::compression::CompressionType;
pub use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main pbm-core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Restore decoding configuration
    pub restore: RestoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Restore decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Codec assumed for files whose metadata carries no compression tag
    #[serde(default)]
    pub default_compression: CompressionType,
    /// Maximum number of units decoded at the same time
    pub max_concurrent_units: usize,
    /// Directory decoded files are written to
    pub output_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl RestoreConfig {
    /// Codec for a file: its own tag when it has one, the configured default otherwise
    pub fn codec_for(&self, tag: Option<&str>) -> CompressionType {
        match tag {
            Some(tag) => tag.parse().unwrap_or_default(),
            None => self.default_compression,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restore: RestoreConfig {
                default_compression: CompressionType::None,
                max_concurrent_units: 4,
                output_dir: "restore".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.restore.max_concurrent_units == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_units must be greater than 0".to_string(),
            ));
        }

        if self.restore.output_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "output_dir cannot be empty".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file with the given default codec
    pub fn create_example_config<P: AsRef<Path>>(path: P, compression: &str) -> Result<(), ConfigError> {
        let default_compression = match compression {
            "none" | "gzip" | "pgzip" | "lz4" | "snappy" | "s2" => compression.parse().unwrap_or_default(),
            _ => return Err(ConfigError::ValidationError(
                format!("Unknown compression '{}'", compression),
            )),
        };

        let config = Config {
            restore: RestoreConfig {
                default_compression,
                max_concurrent_units: 8,
                output_dir: "/var/lib/pbm/restore".to_string(),
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}
