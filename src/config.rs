//! # Configuration Management
//!
//! Centralized configuration for the server substrate: connection limits and
//! buffer sizing for the transport, encode buffer pooling, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - `REALM_CORE_*` environment overrides via `from_env()` / `apply_env()`

use crate::core::MAX_PACKET_SIZE;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "REALM_CORE_";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub packet: PacketConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `REALM_CORE_*` variables on top of the current values.
    ///
    /// A variable that is set but does not parse is an error rather than
    /// being silently ignored.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_var("ADDRESS") {
            self.server.address = addr;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            self.server.port = port;
        }
        if let Some(max) = env_parse::<usize>("MAX_CONNECTIONS")? {
            self.server.max_connections = max;
        }
        if let Some(max) = env_parse::<usize>("MAX_CONNECTIONS_PER_IP")? {
            self.server.max_connections_per_ip = max;
        }
        if let Some(size) = env_parse::<usize>("RECV_BUFFER_SIZE")? {
            self.server.recv_buffer_size = size;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.log_level = Level::from_str(&level)
                .map_err(|_| CoreError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        if let Some(json) = env_parse::<bool>("LOG_JSON")? {
            self.logging.json_format = json;
        }
        Ok(())
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
            .map_err(|e| CoreError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.packet.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            CoreError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: '{raw}'"))
        }),
    }
}

/// Listener and connection-layer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address without the port (e.g., "0.0.0.0")
    pub address: String,

    /// Listen port
    pub port: u16,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Maximum concurrent connections from one remote IP (0 = unlimited)
    pub max_connections_per_ip: usize,

    /// Bytes read from a socket per receive event
    pub recv_buffer_size: usize,

    /// Send buffers queued per connection; overflowing the queue disconnects
    pub send_queue_depth: usize,

    /// Receive buffers kept for reuse after `free_recv`
    pub recv_freelist_limit: usize,

    /// Pause after an accept error
    #[serde(with = "duration_serde")]
    pub accept_backoff: Duration,

    /// Time connection tasks get to finish after shutdown is requested
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0"),
            port: 7777,
            max_connections: 1024,
            max_connections_per_ip: 10,
            recv_buffer_size: 4096,
            send_queue_depth: 64,
            recv_freelist_limit: 256,
            accept_backoff: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    /// `address:port` as a string suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server address: '{}' (expected an IP such as '0.0.0.0')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > u32::MAX as usize {
            errors.push(format!(
                "Max connections too large: {} (maximum: {})",
                self.max_connections,
                u32::MAX
            ));
        }

        if self.max_connections_per_ip > self.max_connections {
            errors.push(format!(
                "Per-IP connection limit {} exceeds max connections {}",
                self.max_connections_per_ip, self.max_connections
            ));
        }

        if self.recv_buffer_size < 64 {
            errors.push("Receive buffer too small (minimum: 64 bytes)".to_string());
        } else if self.recv_buffer_size > 1024 * 1024 {
            errors.push("Receive buffer too large (maximum: 1 MB)".to_string());
        }

        if self.send_queue_depth == 0 {
            errors.push("Send queue depth must be greater than 0".to_string());
        }

        if self.accept_backoff.as_secs() > 10 {
            errors.push("Accept backoff too long (maximum: 10s)".to_string());
        }

        if self.shutdown_grace.as_secs() > 60 {
            errors.push("Shutdown grace period too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Encode buffer pooling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PacketConfig {
    /// Buffers kept in the pool
    pub pool_buffers: usize,

    /// Capacity of each pooled buffer in bytes
    pub buffer_capacity: usize,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            pool_buffers: 8,
            buffer_capacity: MAX_PACKET_SIZE + 1,
        }
    }
}

impl PacketConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.buffer_capacity < 16 {
            errors.push("Packet buffer capacity too small (minimum: 16 bytes)".to_string());
        } else if self.buffer_capacity > MAX_PACKET_SIZE + 1 {
            errors.push(format!(
                "Packet buffer capacity {} exceeds the largest message ({} bytes)",
                self.buffer_capacity, MAX_PACKET_SIZE
            ));
        }

        if self.pool_buffers > 4096 {
            errors.push(format!(
                "Packet pool very large: {} buffers (maximum: 4096)",
                self.pool_buffers
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to emit ANSI colours in text output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("realm-core"),
            log_level: Level::INFO,
            json_format: false,
            ansi: true,
        }
    }
}

impl LoggingConfig {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CoreConfig::default().validate().is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = CoreConfig::from_toml(
            r#"
            [server]
            port = 9100
            accept_backoff = 10

            [logging]
            log_level = "debug"
            "#,
        )
        .expect("parse");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.accept_backoff, Duration::from_millis(10));
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.logging.log_level, Level::DEBUG);
    }

    #[test]
    fn test_example_config_round_trips() {
        let text = CoreConfig::example_config();
        let parsed = CoreConfig::from_toml(&text).expect("parse example");
        assert_eq!(parsed.server.port, ServerConfig::default().port);
    }
}
