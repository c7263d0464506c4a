//! Binary codec for the device protocol.
//!
//! Packets have no length field: the first byte selects a fixed body size.
//! Decoding therefore works in two steps:
//!
//! 1. Look at the tag and work out the total packet size.
//! 2. If the buffer holds fewer bytes, report [`ProtocolError::InsufficientData`]
//!    so the caller reads more and retries; otherwise decode the body.
//!
//! The gateway side uses [`decode_inbound`] and [`encode_outbound`].  The mirror
//! pair [`encode_inbound`] / [`decode_outbound`] is what a device (or a device
//! simulator in tests) uses.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::TransportFlag;
use crate::protocol::packets::{
    HandshakePacket, HandshakeReason, InPacket, InPacketType, OutPacket, OutPacketType,
    WeatherStatusPacket, TAG_SIZE, UUID_SIZE,
};

/// Errors that can occur while encoding or decoding device packets and
/// browser frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The buffer does not yet hold a complete packet.  Not a failure: read
    /// more bytes and try again.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The tag byte is not a recognized packet type.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// A field inside an otherwise complete packet holds an invalid value.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A length prefix announced more bytes than the configured maximum.
    #[error("payload too big: declared {declared} bytes, maximum is {max}")]
    PayloadTooBig { declared: usize, max: usize },
}

// ── Gateway side ──────────────────────────────────────────────────────────────

/// Decodes one device packet from the beginning of `bytes`.
///
/// Returns the packet and the number of bytes it occupied, so the caller can
/// drop exactly that prefix from its accumulation buffer.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if `bytes` is empty or shorter than
///   the size implied by the tag.
/// - [`ProtocolError::UnknownPacketType`] for an unrecognized tag.
/// - [`ProtocolError::MalformedPayload`] for an invalid transport flag.
///
/// # Examples
///
/// ```rust
/// use weather_core::protocol::{decode_inbound, encode_inbound, InPacket};
///
/// let bytes = encode_inbound(&InPacket::Pong);
/// let (packet, consumed) = decode_inbound(&bytes).unwrap();
/// assert_eq!(packet, InPacket::Pong);
/// assert_eq!(consumed, 1);
/// ```
pub fn decode_inbound(bytes: &[u8]) -> Result<(InPacket, usize), ProtocolError> {
    let tag = peek_tag(bytes)?;
    let packet_type =
        InPacketType::try_from(tag).map_err(|()| ProtocolError::UnknownPacketType(tag))?;
    let size = packet_type.packet_size();
    require_complete(bytes, size)?;

    let body = &bytes[TAG_SIZE..size];
    let packet = match packet_type {
        InPacketType::Handshake => InPacket::Handshake(HandshakePacket {
            uuid: read_uuid(body, 0)?,
            station_id: body[UUID_SIZE],
        }),
        InPacketType::Pong => InPacket::Pong,
        InPacketType::WeatherStatus => InPacket::WeatherStatus(WeatherStatusPacket {
            session: read_uuid(body, 0)?,
            temperature: f32::from_bits(read_u32(body, UUID_SIZE)?),
            humidity: f32::from_bits(read_u32(body, UUID_SIZE + 4)?),
            time: read_u32(body, UUID_SIZE + 8)?,
            flag: read_flag(body, UUID_SIZE + 12)?,
        }),
    };
    Ok((packet, size))
}

/// Encodes a gateway-to-device packet.
pub fn encode_outbound(packet: &OutPacket) -> Vec<u8> {
    let packet_type = packet.packet_type();
    let mut buf = Vec::with_capacity(packet_type.packet_size());
    buf.push(packet_type as u8);

    match packet {
        OutPacket::Handshake | OutPacket::HandshakeAck | OutPacket::Ping => {}
        OutPacket::HandshakeNak(reason) => buf.push(*reason as u8),
        OutPacket::WeatherStatusRequest { session, flag } => {
            buf.extend_from_slice(session.as_bytes());
            buf.push(*flag as u8);
        }
    }
    buf
}

// ── Device side ───────────────────────────────────────────────────────────────

/// Encodes a device-to-gateway packet.
pub fn encode_inbound(packet: &InPacket) -> Vec<u8> {
    let packet_type = packet.packet_type();
    let mut buf = Vec::with_capacity(packet_type.packet_size());
    buf.push(packet_type as u8);

    match packet {
        InPacket::Handshake(p) => {
            buf.extend_from_slice(p.uuid.as_bytes());
            buf.push(p.station_id);
        }
        InPacket::Pong => {}
        InPacket::WeatherStatus(p) => {
            buf.extend_from_slice(p.session.as_bytes());
            buf.extend_from_slice(&p.temperature.to_bits().to_le_bytes());
            buf.extend_from_slice(&p.humidity.to_bits().to_le_bytes());
            buf.extend_from_slice(&p.time.to_le_bytes());
            buf.push(p.flag as u8);
        }
    }
    buf
}

/// Decodes one gateway-to-device packet from the beginning of `bytes`.
///
/// # Errors
///
/// Same contract as [`decode_inbound`]; an unknown NAK reason or transport
/// flag is a [`ProtocolError::MalformedPayload`].
pub fn decode_outbound(bytes: &[u8]) -> Result<(OutPacket, usize), ProtocolError> {
    let tag = peek_tag(bytes)?;
    let packet_type =
        OutPacketType::try_from(tag).map_err(|()| ProtocolError::UnknownPacketType(tag))?;
    let size = packet_type.packet_size();
    require_complete(bytes, size)?;

    let body = &bytes[TAG_SIZE..size];
    let packet = match packet_type {
        OutPacketType::Handshake => OutPacket::Handshake,
        OutPacketType::HandshakeAck => OutPacket::HandshakeAck,
        OutPacketType::HandshakeNak => {
            let reason = HandshakeReason::try_from(body[0]).map_err(|()| {
                ProtocolError::MalformedPayload(format!("unknown handshake reason 0x{:02X}", body[0]))
            })?;
            OutPacket::HandshakeNak(reason)
        }
        OutPacketType::Ping => OutPacket::Ping,
        OutPacketType::WeatherStatusRequest => OutPacket::WeatherStatusRequest {
            session: read_uuid(body, 0)?,
            flag: read_flag(body, UUID_SIZE)?,
        },
    };
    Ok((packet, size))
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn peek_tag(bytes: &[u8]) -> Result<u8, ProtocolError> {
    bytes.first().copied().ok_or(ProtocolError::InsufficientData {
        needed: TAG_SIZE,
        available: 0,
    })
}

fn require_complete(bytes: &[u8], size: usize) -> Result<(), ProtocolError> {
    if bytes.len() < size {
        Err(ProtocolError::InsufficientData {
            needed: size,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    let raw = buf.get(offset..offset + UUID_SIZE).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("need 16 bytes for UUID at offset {offset}"))
    })?;
    let mut bytes = [0u8; UUID_SIZE];
    bytes.copy_from_slice(raw);
    Ok(Uuid::from_bytes(bytes))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    let raw = buf.get(offset..offset + 4).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("need 4 bytes for u32 at offset {offset}"))
    })?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_flag(buf: &[u8], offset: usize) -> Result<TransportFlag, ProtocolError> {
    let raw = buf.get(offset).copied().ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("missing transport flag at offset {offset}"))
    })?;
    TransportFlag::try_from(raw)
        .map_err(|()| ProtocolError::MalformedPayload(format!("unknown transport flag 0x{raw:02X}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
