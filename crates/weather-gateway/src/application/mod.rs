//! Application layer for weather-gateway.
//!
//! The application layer holds the protocol logic: it knows *what* to do with
//! each packet or request, but delegates *how* bytes move to the
//! infrastructure layer.
//!
//! # Responsibilities
//!
//! - Tracking live sessions (`registry`)
//! - The device handshake/keepalive state machine (`device_handler`, `keepalive`)
//! - Browser request dispatch (`browser_handler`)
//! - Serializing outbound writes (`write_queue`)
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - Tokio task spawning (that happens in the infrastructure layer)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod browser_handler;
pub mod device_handler;
pub mod keepalive;
pub mod registry;
pub mod write_queue;

pub use browser_handler::BrowserHandler;
pub use device_handler::{DeviceAction, DeviceHandler, DeviceState};
pub use keepalive::{Keepalive, KeepaliveTimer};
pub use registry::{
    BrowserEvent, BrowserLink, DeviceCommand, DeviceLink, Notifier, SessionRegistry,
};
pub use write_queue::WriteQueue;
