//! Domain layer for weather-gateway.
//!
//! Pure types with no dependencies on I/O, networking, or async runtimes:
//! the configuration schema, the device allow-list, and the JSON messages
//! exchanged with browsers.

pub mod config;
pub mod directory;
pub mod messages;

pub use config::{ConfigError, GatewayConfig, SessionConfig};
pub use directory::{AllowList, StationDirectory};
pub use messages::{BrowserRequest, BrowserResponse, RequestError, StationInfo};
