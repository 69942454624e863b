//! # Configuration Management
//!
//! Centralized configuration for the remoting transport.
//!
//! This module provides structured configuration for servers and clients,
//! including connection parameters, timeouts, admission-gate sizing, and
//! socket options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides
//!
//! ## Security Considerations
//! - Bounded frame size (16 MB) prevents memory exhaustion from hostile peers
//! - Idle timeouts reclaim dead connections
//! - Admission-gate permit counts protect process memory under load

use crate::error::{RemotingError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes identifying a remoting frame on the wire
pub const MAGIC_BYTES: [u8; 4] = [0x95, 0x1A, 0xEF, 0xC8];

/// Max allowed frame content size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RemotingConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RemotingConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| RemotingError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RemotingError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RemotingError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REMOTING_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("REMOTING_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(permits) = std::env::var("REMOTING_ASYNC_PERMITS") {
            if let Ok(val) = permits.parse::<usize>() {
                config.server.async_permits = val;
                config.client.async_permits = val;
            }
        }

        if let Ok(permits) = std::env::var("REMOTING_ONEWAY_PERMITS") {
            if let Ok(val) = permits.parse::<usize>() {
                config.server.oneway_permits = val;
                config.client.oneway_permits = val;
            }
        }

        if let Ok(timeout) = std::env::var("REMOTING_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(idle) = std::env::var("REMOTING_MAX_IDLE_MS") {
            if let Ok(val) = idle.parse::<u64>() {
                config.server.max_idle = Duration::from_millis(val);
                config.client.max_idle = Duration::from_millis(val);
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
            .map_err(|e| RemotingError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| RemotingError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RemotingError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:7879")
    pub address: String,

    /// Listen backlog
    pub backlog: u32,

    /// Permits bounding concurrent async invocations in flight
    pub async_permits: usize,

    /// Permits bounding concurrent oneway invocations in flight
    pub oneway_permits: usize,

    /// Concurrency available to response callbacks
    pub callback_concurrency: usize,

    /// A connection with no traffic in either direction for this long is closed
    #[serde(with = "duration_serde")]
    pub max_idle: Duration,

    /// Whether the transport is wrapped in TLS
    pub enable_tls: bool,

    /// Socket options
    #[serde(default)]
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7879"),
            backlog: 1024,
            async_permits: 64,
            oneway_permits: 256,
            callback_concurrency: 4,
            max_idle: timeout::DEFAULT_IDLE_TIMEOUT,
            enable_tls: false,
            socket: SocketConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7879')",
                self.address
            ));
        }

        if self.async_permits == 0 {
            errors.push("Async permit count must be greater than 0".to_string());
        } else if self.async_permits > 1_000_000 {
            errors.push(format!(
                "Async permit count too large: {} (max recommended: 1,000,000)",
                self.async_permits
            ));
        }

        if self.oneway_permits == 0 {
            errors.push("Oneway permit count must be greater than 0".to_string());
        }

        if self.callback_concurrency == 0 {
            errors.push("Callback concurrency must be greater than 0".to_string());
        }

        if self.max_idle.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        } else if self.max_idle.as_secs() > 3600 {
            errors.push("Idle timeout too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Permits bounding concurrent async invocations in flight
    pub async_permits: usize,

    /// Permits bounding concurrent oneway invocations in flight
    pub oneway_permits: usize,

    /// Concurrency available to response callbacks
    pub callback_concurrency: usize,

    /// A connection with no traffic in either direction for this long is closed
    #[serde(with = "duration_serde")]
    pub max_idle: Duration,

    /// Whether the transport is wrapped in TLS
    pub enable_tls: bool,

    /// Socket options
    #[serde(default)]
    pub socket: SocketConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7879"),
            connect_timeout: timeout::DEFAULT_CONNECT_TIMEOUT,
            async_permits: 65535,
            oneway_permits: 65535,
            callback_concurrency: 4,
            max_idle: timeout::DEFAULT_IDLE_TIMEOUT,
            enable_tls: false,
            socket: SocketConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'host:7879')",
                self.address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.async_permits == 0 {
            errors.push("Async permit count must be greater than 0".to_string());
        }

        if self.oneway_permits == 0 {
            errors.push("Oneway permit count must be greater than 0".to_string());
        }

        if self.max_idle.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Socket configuration
///
/// A value of zero leaves the corresponding option at the OS default.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SocketConfig {
    /// SO_SNDBUF size in bytes
    pub send_buffer_size: u32,

    /// SO_RCVBUF size in bytes
    pub recv_buffer_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("remoting-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
