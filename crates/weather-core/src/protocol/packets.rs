//! Device protocol packet types.
//!
//! Every packet starts with a 1-byte tag.  There is no length field: the body
//! size is implied by the tag, so both sides must agree on the tables below.
//! Tag values and field order are the compatibility surface with deployed
//! firmware and must never be reordered.
//!
//! ```text
//! device -> gateway
//!   Handshake      0x00  [uuid:16][station_id:1]
//!   Pong           0x01  (empty)
//!   WeatherStatus  0x02  [session_uuid:16][temperature:f32][humidity:f32][time:u32][flag:1]
//!
//! gateway -> device
//!   Handshake              0x00  (empty, greeting)
//!   HandshakeAck           0x01  (empty)
//!   HandshakeNak           0x02  [reason:1]
//!   Ping                   0x03  (empty)
//!   WeatherStatusRequest   0x04  [session_uuid:16][flag:1]
//! ```
//!
//! Multi-byte numeric fields are little-endian (the firmware writes its packed
//! structs straight from a little-endian microcontroller).

use uuid::Uuid;

use crate::domain::TransportFlag;

/// Size of the tag that starts every packet.
pub const TAG_SIZE: usize = 1;

/// Size of a raw UUID on the wire.
pub const UUID_SIZE: usize = 16;

// ── Packet tags ───────────────────────────────────────────────────────────────

/// Tags of packets sent by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InPacketType {
    Handshake = 0x00,
    Pong = 0x01,
    WeatherStatus = 0x02,
}

impl InPacketType {
    /// Total packet size on the wire, tag included.
    pub fn packet_size(self) -> usize {
        match self {
            InPacketType::Handshake => TAG_SIZE + UUID_SIZE + 1,
            InPacketType::Pong => TAG_SIZE,
            InPacketType::WeatherStatus => TAG_SIZE + UUID_SIZE + 4 + 4 + 4 + 1,
        }
    }
}

impl TryFrom<u8> for InPacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(InPacketType::Handshake),
            0x01 => Ok(InPacketType::Pong),
            0x02 => Ok(InPacketType::WeatherStatus),
            _ => Err(()),
        }
    }
}

/// Tags of packets sent by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutPacketType {
    Handshake = 0x00,
    HandshakeAck = 0x01,
    HandshakeNak = 0x02,
    Ping = 0x03,
    WeatherStatusRequest = 0x04,
}

impl OutPacketType {
    /// Total packet size on the wire, tag included.
    pub fn packet_size(self) -> usize {
        match self {
            OutPacketType::Handshake | OutPacketType::HandshakeAck | OutPacketType::Ping => {
                TAG_SIZE
            }
            OutPacketType::HandshakeNak => TAG_SIZE + 1,
            OutPacketType::WeatherStatusRequest => TAG_SIZE + UUID_SIZE + 1,
        }
    }
}

impl TryFrom<u8> for OutPacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(OutPacketType::Handshake),
            0x01 => Ok(OutPacketType::HandshakeAck),
            0x02 => Ok(OutPacketType::HandshakeNak),
            0x03 => Ok(OutPacketType::Ping),
            0x04 => Ok(OutPacketType::WeatherStatusRequest),
            _ => Err(()),
        }
    }
}

// ── Handshake rejection reasons ───────────────────────────────────────────────

/// Reason byte carried by a `HandshakeNak`.
///
/// The values are bit-distinct so firmware can test them with a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeReason {
    /// Another device already holds the requested station id.
    StationIdAlready = 0x01,
    /// The requested station id is outside the valid range.
    StationIdInvalid = 0x02,
    /// The UUID is well-formed but not on the allow-list.
    UuidNotRegistered = 0x04,
    /// The UUID bytes do not form a valid RFC 4122 UUID.
    UuidInvalidFormat = 0x08,
}

impl TryFrom<u8> for HandshakeReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(HandshakeReason::StationIdAlready),
            0x02 => Ok(HandshakeReason::StationIdInvalid),
            0x04 => Ok(HandshakeReason::UuidNotRegistered),
            0x08 => Ok(HandshakeReason::UuidInvalidFormat),
            _ => Err(()),
        }
    }
}

// ── Packet bodies ─────────────────────────────────────────────────────────────

/// Authentication request sent by a device after the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePacket {
    /// Device identity checked against the allow-list.
    pub uuid: Uuid,
    /// Raw requested station id.  Kept raw because an out-of-range value is a
    /// business-rule rejection (NAK), not a decoding failure.
    pub station_id: u8,
}

/// A reading sent by a device in reply to a `WeatherStatusRequest`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherStatusPacket {
    /// Browser session that asked for this reading, echoed from the request.
    pub session: Uuid,
    pub temperature: f32,
    pub humidity: f32,
    pub time: u32,
    /// Transport of the requesting browser session, echoed from the request.
    pub flag: TransportFlag,
}

/// Every packet a device may send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InPacket {
    Handshake(HandshakePacket),
    Pong,
    WeatherStatus(WeatherStatusPacket),
}

impl InPacket {
    pub fn packet_type(&self) -> InPacketType {
        match self {
            InPacket::Handshake(_) => InPacketType::Handshake,
            InPacket::Pong => InPacketType::Pong,
            InPacket::WeatherStatus(_) => InPacketType::WeatherStatus,
        }
    }
}

/// Every packet the gateway may send to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutPacket {
    /// Greeting sent as soon as the connection is accepted.
    Handshake,
    HandshakeAck,
    HandshakeNak(HandshakeReason),
    Ping,
    /// Asks the device for a reading on behalf of a browser session.
    WeatherStatusRequest { session: Uuid, flag: TransportFlag },
}

impl OutPacket {
    pub fn packet_type(&self) -> OutPacketType {
        match self {
            OutPacket::Handshake => OutPacketType::Handshake,
            OutPacket::HandshakeAck => OutPacketType::HandshakeAck,
            OutPacket::HandshakeNak(_) => OutPacketType::HandshakeNak,
            OutPacket::Ping => OutPacketType::Ping,
            OutPacket::WeatherStatusRequest { .. } => OutPacketType::WeatherStatusRequest,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
