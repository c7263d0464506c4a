//! weather-gateway library crate.
//!
//! A gateway between weather stations and web browsers.  Stations connect
//! over TCP with a compact binary protocol, authenticate with a UUID from an
//! allow-list, and then answer reading requests.  Browsers connect over
//! WebSocket, ask which stations are online, and ask for readings; each
//! reading a station produces is routed back to the browser session that
//! asked for it.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Weather station (binary over TCP)        Browser (JSON over WebSocket)
//!         ↕                                          ↕
//! [weather-gateway]
//!   ├── domain/           Pure types: config, allow-list, JSON messages
//!   ├── application/      Handlers, session registry, keepalive, write queue
//!   └── infrastructure/
//!         ├── server          Listeners and accept loops
//!         ├── device_session  One task per station connection
//!         └── browser_session One task per browser connection
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `weather-core`; it uses tokio
//!   channels and time types but never opens a socket.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration and message types (no I/O).
pub mod domain;

/// Application layer: protocol handlers and session bookkeeping.
pub mod application;

/// Infrastructure layer: listeners and session tasks.
pub mod infrastructure;
