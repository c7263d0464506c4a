//! Gateway configuration.
//!
//! [`GatewayConfig`] is read once at startup from a TOML file and then shared
//! read-only (behind an `Arc`) with every session.  Every field has a default,
//! so an empty file, or no file at all, is a valid configuration.
//!
//! # Example file
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! device_port = 8081
//! browser_port = 8080
//! worker_threads = 0          # 0 = one worker per hardware thread
//!
//! [session]
//! handshake_timeout_ms = 30000
//! ping_interval_ms = 10000
//! pong_timeout_ms = 10000
//!
//! # Devices allowed to authenticate.
//! [[devices]]
//! uuid = "6f1c3a52-9d44-4b8e-9102-337ac4105ed9"
//! note = "roof sensor"
//!
//! # Display names shown to browsers.
//! [[stations]]
//! id = 1
//! name = "Goe"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the file.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;
use weather_core::StationId;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but holds an unusable value.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Allow-list of devices permitted to authenticate.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// Display names for stations.
    #[serde(default)]
    pub stations: Vec<StationEntry>,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address both listeners bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port for device connections.
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    /// TCP port for browser WebSocket connections.
    #[serde(default = "default_browser_port")]
    pub browser_port: u16,
    /// Runtime worker threads; `0` lets tokio use one per hardware thread.
    #[serde(default)]
    pub worker_threads: usize,
}

/// Per-session timing and size limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// How long a device may stay connected without authenticating.
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long an authenticated device may stay silent, and how long a
    /// browser may leave a request half sent.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Upper bound for a single write to any peer.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Delay between keepalive pings to an authenticated device or a browser.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// How long to wait for a pong before dropping the peer.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Upper bound for the WebSocket upgrade of a browser connection.
    #[serde(default = "default_timeout_ms")]
    pub websocket_handshake_timeout_ms: u64,
    /// Largest browser request payload accepted, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Capacity of each session's inbound command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// One allow-listed device.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub uuid: Uuid,
    /// Free-form operator note; never interpreted.
    #[serde(default)]
    pub note: Option<String>,
}

/// Display name override for one station.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StationEntry {
    pub id: StationId,
    pub name: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_device_port() -> u16 {
    8081
}
fn default_browser_port() -> u16 {
    8080
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_ping_interval_ms() -> u64 {
    10_000
}
fn default_pong_timeout_ms() -> u64 {
    10_000
}
fn default_max_payload_bytes() -> usize {
    4096
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            device_port: default_device_port(),
            browser_port: default_browser_port(),
            worker_threads: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            websocket_handshake_timeout_ms: default_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ServerConfig {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IPv4 or IPv6 address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "server.bind_address '{}' is not an IP address",
                self.bind_address
            ))
        })
    }

    pub fn device_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.device_port))
    }

    pub fn browser_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.browser_port))
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn websocket_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.websocket_handshake_timeout_ms)
    }

    /// Rejects values that would make sessions unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("pong_timeout_ms", self.pong_timeout_ms),
            ("websocket_handshake_timeout_ms", self.websocket_handshake_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("session.{name} must be positive")));
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "session.max_payload_bytes must be in 1..={}, got {}",
                u16::MAX,
                self.max_payload_bytes
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GatewayConfig {
    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML (including an
    /// out-of-range station id) and [`ConfigError::Invalid`] for unusable
    /// values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values serde cannot check on its own.
    ///
    /// Called again after command-line overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind_ip()?;
        if self.server.device_port != 0 && self.server.device_port == self.server.browser_port {
            return Err(ConfigError::Invalid(format!(
                "server.device_port and server.browser_port are both {}",
                self.server.device_port
            )));
        }
        self.session.validate()
    }
}

/// Loads the configuration at `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and the errors of [`GatewayConfig::from_toml_str`] for bad content.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => GatewayConfig::from_toml_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GatewayConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
