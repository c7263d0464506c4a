//! Length-prefix framing for browser requests.
//!
//! Inside WebSocket messages, browsers send requests as:
//!
//! ```text
//! [length:u16 little-endian][payload:length bytes of UTF-8 JSON]
//! ```
//!
//! A single WebSocket message may carry several frames or only part of one,
//! so the framer works on an accumulation buffer exactly like the device
//! codec does.
//!
//! The prefix is little-endian.  The web front-end writes the low byte first
//! and this is the byte order the gateway accepts.

use crate::protocol::codec::ProtocolError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the payload slice and the total number of bytes consumed (prefix
/// plus payload).
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] while the prefix or payload is still
///   incomplete.
/// - [`ProtocolError::PayloadTooBig`] as soon as the prefix announces more than
///   `max_payload` bytes, without waiting for the payload to arrive.
///
/// # Examples
///
/// ```rust
/// use weather_core::protocol::{decode_frame, encode_frame};
///
/// let frame = encode_frame(br#"{"id":1}"#).unwrap();
/// let (payload, consumed) = decode_frame(&frame, 4096).unwrap();
/// assert_eq!(payload, br#"{"id":1}"#);
/// assert_eq!(consumed, frame.len());
/// ```
pub fn decode_frame(bytes: &[u8], max_payload: usize) -> Result<(&[u8], usize), ProtocolError> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        });
    }

    let declared = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if declared > max_payload {
        return Err(ProtocolError::PayloadTooBig {
            declared,
            max: max_payload,
        });
    }

    let total = LENGTH_PREFIX_SIZE + declared;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    Ok((&bytes[LENGTH_PREFIX_SIZE..total], total))
}

/// Prepends the little-endian length prefix to `payload`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooBig`] if `payload` does not fit in the
/// 16-bit prefix.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooBig {
        declared: payload.len(),
        max: u16::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
