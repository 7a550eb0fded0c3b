//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file
//! (or no file at all) yields a working lab setup.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use spdy::{DefaultFlowControl, Version};

/// Server configuration loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Protocol engine knobs.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7443))
}

/// Protocol engine knobs.
///
/// The binary speaks plaintext SPDY at a fixed version; NPN/ALPN version
/// selection belongs to a TLS terminator in front of it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Protocol version token: "spdy/2", "spdy/3", or "spdy/3.1".
    #[serde(default = "default_version")]
    pub version: String,

    /// Ceiling on concurrent client-initiated streams.
    #[serde(default = "default_max_streams")]
    pub max_concurrent_streams: u32,

    /// Advertised per-stream receive window in bytes.
    #[serde(default = "default_window")]
    pub initial_window_size: u32,

    /// Benign-anomaly budget before a connection is dropped.
    #[serde(default = "default_benign")]
    pub max_benign_errors: u32,

    /// Socket read deadline in milliseconds (absent = none).
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Socket write deadline in milliseconds (absent = none).
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            version: default_version(),
            max_concurrent_streams: default_max_streams(),
            initial_window_size: default_window(),
            max_benign_errors: default_benign(),
            read_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

impl ProtocolConfig {
    /// The parsed protocol version.
    pub fn version(&self) -> Result<Version, ConfigError> {
        Version::from_npn(&self.version)
            .ok_or_else(|| ConfigError::InvalidVersion(self.version.clone()))
    }

    /// Build the engine configuration for one connection.
    pub fn engine_config(&self) -> Result<spdy::Config, ConfigError> {
        let config = spdy::Config::server(self.version()?)
            .max_concurrent_streams(self.max_concurrent_streams)
            .max_benign_errors(self.max_benign_errors)
            .read_timeout(self.read_timeout_ms.map(Duration::from_millis))
            .write_timeout(self.write_timeout_ms.map(Duration::from_millis))
            .flow_control(Arc::new(DefaultFlowControl::new(self.initial_window_size)));
        Ok(config)
    }
}

fn default_version() -> String {
    "spdy/3.1".to_string()
}

fn default_max_streams() -> u32 {
    spdy::DEFAULT_MAX_CONCURRENT_STREAMS
}

fn default_window() -> u32 {
    spdy::DEFAULT_INITIAL_WINDOW_SIZE
}

fn default_benign() -> u32 {
    10
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG when set).
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the event's target module.
    #[serde(default = "default_true")]
    pub target: bool,

    /// Include thread names.
    #[serde(default)]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: true,
            thread_names: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    InvalidVersion(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::InvalidVersion(v) => write!(f, "unknown protocol version {:?}", v),
        }
    }
}

impl std::error::Error for ConfigError {}
