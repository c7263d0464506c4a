//! Infrastructure layer for weather-gateway.
//!
//! The infrastructure layer handles all I/O: the two TCP listeners, the
//! WebSocket upgrade, and the per-connection session tasks that move bytes
//! between sockets and the application-layer handlers.
//!
//! # Responsibilities
//!
//! - Binding the device and browser listeners (`server`)
//! - Reading, buffering and writing device packets (`device_session`)
//! - Performing the WebSocket upgrade and serializing browser writes
//!   (`browser_session`)
//! - Enforcing handshake, read, write and keepalive deadlines
//!
//! # What does NOT belong here?
//!
//! - Packet and request semantics (that is the application layer)
//! - Message type definitions (that is the domain layer and `weather-core`)
//! - Command-line parsing (that is done in `main.rs`)

pub mod browser_session;
pub mod device_session;
pub mod server;
pub mod session;

pub use browser_session::{accept_browser, run_browser_session, SERVER_HEADER};
pub use device_session::run_device_session;
pub use server::{run_server, Gateway};
pub use session::{SessionContext, SessionError};
