//! # weather-core
//!
//! Shared library for the weather gateway containing the device wire
//! protocol, the browser framing layer, and the station domain types.
//!
//! It has zero dependencies on sockets, async runtimes, or logging backends:
//! every function here is a pure transformation over byte slices and values,
//! which makes the protocol easy to test exhaustively.
//!
//! # Architecture overview (for beginners)
//!
//! Weather-station microcontrollers ("devices") connect to the gateway over
//! raw TCP and speak a tiny binary protocol.  Web browsers connect over
//! WebSocket and speak length-prefixed JSON.  The gateway sits in the middle
//! and routes a browser's request to the right device, then routes the
//! device's reading back to that browser.
//!
//! This crate (`weather-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Value types: which stations exist ([`StationId`]), what a
//!   reading looks like ([`WeatherStatusNotification`]), and which transport a
//!   browser session used ([`TransportFlag`]).
//!
//! - **`protocol`** – How bytes travel over the wire.  Device packets are a
//!   1-byte tag followed by a fixed-size body; browser frames are a 2-byte
//!   length followed by JSON text.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `weather_core::StationId` instead of `weather_core::domain::station::StationId`.
pub use domain::reading::{TransportFlag, WeatherStatusNotification};
pub use domain::station::{StationId, StationIdError};
pub use protocol::codec::{decode_inbound, encode_outbound, ProtocolError};
pub use protocol::frame::{decode_frame, encode_frame};
pub use protocol::packets::{HandshakeReason, InPacket, OutPacket};
pub use protocol::HandlerResult;
