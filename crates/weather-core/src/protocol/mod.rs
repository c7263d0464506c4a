//! Protocol module: device packet types, the device binary codec, and the
//! browser length-prefix framer.

pub mod codec;
pub mod frame;
pub mod packets;

pub use codec::{decode_inbound, decode_outbound, encode_inbound, encode_outbound, ProtocolError};
pub use frame::{decode_frame, encode_frame, LENGTH_PREFIX_SIZE};
pub use packets::*;

/// Outcome of offering an accumulation buffer to a protocol handler.
///
/// Handlers return this together with the number of bytes they consumed, so
/// the session driving the connection knows whether to dispatch, read more,
/// or tear the connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// One complete unit was handled; drop the consumed bytes and continue.
    Good,
    /// Protocol violation; the session must be closed.
    Bad,
    /// Not enough bytes buffered yet; read more and retry.
    Indeterminate,
    /// The peer announced a payload above the configured maximum.
    PayloadTooBig,
}
