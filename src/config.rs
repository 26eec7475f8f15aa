//! # Configuration Management
//!
//! Centralized configuration for the request broker.
//!
//! This module provides structured configuration for the result pipe, the
//! outbound HTTP transport, the envelope codec and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Security Considerations
//! - The envelope size limit bounds the memory a caller can make the broker allocate
//! - The pipe capacity bounds how far the upstream response can run ahead of the reader

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Magic bytes opening every envelope ("RQBK")
pub const MAGIC_BYTES: [u8; 4] = [0x52, 0x51, 0x42, 0x4B];

/// Max allowed envelope size (e.g. 4 MB)
pub const MAX_ENVELOPE_SIZE: usize = 4 * 1024 * 1024;

/// Longest diagnostic or headers text written into a result prefix.
/// Kept well below [`MAX_ENVELOPE_SIZE`] so every prefix the broker writes
/// can be read back.
pub const MAX_SLOT_TEXT_LEN: usize = 1024 * 1024;

/// Default number of chunks buffered between the writer task and the reader
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Default redirect hop limit when a caller asks to follow redirects
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Main broker configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BrokerConfig {
    /// Result pipe configuration
    #[serde(default)]
    pub pipe: PipeConfig,

    /// Outbound HTTP configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Envelope codec configuration
    #[serde(default)]
    pub codec: CodecConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| BrokerError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| BrokerError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| BrokerError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("REQUEST_BROKER_PIPE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.pipe.capacity = val;
            }
        }

        if let Ok(timeout) = std::env::var("REQUEST_BROKER_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.http.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("REQUEST_BROKER_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.http.request_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(redirects) = std::env::var("REQUEST_BROKER_MAX_REDIRECTS") {
            if let Ok(val) = redirects.parse::<usize>() {
                config.http.max_redirects = val;
            }
        }

        if let Ok(size) = std::env::var("REQUEST_BROKER_MAX_ENVELOPE_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.codec.max_envelope_size = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BrokerError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| BrokerError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.pipe.validate());
        errors.extend(self.http.validate());
        errors.extend(self.codec.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Result pipe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipeConfig {
    /// Number of chunks buffered before the writer task blocks
    pub capacity: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl PipeConfig {
    /// Validate pipe configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.capacity == 0 {
            errors.push("Pipe capacity must be greater than 0".to_string());
        } else if self.capacity > 4096 {
            errors.push(format!(
                "Pipe capacity too large: {} (max recommended: 4096)",
                self.capacity
            ));
        }

        errors
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Timeout for establishing the upstream connection
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Deadline for the upstream response head (status and headers).
    /// Streaming the body afterwards is not bounded by it.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Redirect hop limit used when a request asks to follow redirects
    pub max_redirects: usize,

    /// User agent sent upstream
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: format!("request-broker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Validate HTTP configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Request timeout too short (minimum: 100ms)".to_string());
        }

        if self.max_redirects == 0 {
            errors.push("Max redirects must be greater than 0".to_string());
        } else if self.max_redirects > 50 {
            errors.push(format!(
                "Max redirects too large: {} (maximum: 50)",
                self.max_redirects
            ));
        }

        if self.user_agent.is_empty() {
            errors.push("User agent cannot be empty".to_string());
        }

        errors
    }
}

/// Envelope codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Maximum accepted size of an inbound descriptor envelope in bytes
    pub max_envelope_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: MAX_ENVELOPE_SIZE,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_envelope_size < 1024 {
            errors.push("Max envelope size too small (minimum: 1 KB)".to_string());
        } else if self.max_envelope_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Max envelope size too large: {} bytes (maximum recommended: 64 MB)",
                self.max_envelope_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("request-broker"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
