//! Device protocol engine.
//!
//! [`DeviceHandler`] is a sans-IO state machine: it is offered the session's
//! accumulation buffer, decodes at most one packet, updates its state, and
//! records what the session should do next as [`DeviceAction`]s.  It never
//! touches a socket or a timer itself, which keeps every protocol rule
//! testable with plain byte slices.
//!
//! # States
//!
//! ```text
//!                 valid Handshake (ACK)
//!   Connected ─────────────────────────────► Authenticated(station)
//!     │   ▲                                      │      │
//!     │   └── rejected Handshake (NAK) ──┘       │      ├── WeatherStatus → bridge
//!     │                                          │      └── Pong → keepalive
//!     │                                          │
//!     └──────────── close() / Drop ──────────────┴──────► Closed
//! ```
//!
//! A rejected handshake answers with a NAK and keeps the connection open so
//! the device can retry.  Any other protocol violation returns
//! [`HandlerResult::Bad`] and the session drops the connection.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;
use weather_core::protocol::packets::{HandshakePacket, WeatherStatusPacket};
use weather_core::{
    decode_inbound, HandlerResult, HandshakeReason, InPacket, OutPacket, ProtocolError, StationId,
    WeatherStatusNotification,
};

use crate::application::registry::{DeviceLink, SessionRegistry};
use crate::domain::StationDirectory;

/// Connection state of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Accepted but not yet authenticated.
    Connected,
    /// Holds `StationId` in the registry.
    Authenticated(StationId),
    /// Torn down; every further packet is rejected.
    Closed,
}

/// Side effects requested by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// Write a packet to the device.
    Send(OutPacket),
    /// The device authenticated; arm the ping timer.
    StartKeepalive,
    /// The device answered a ping.
    PongReceived,
}

pub struct DeviceHandler {
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn StationDirectory>,
    link: Arc<DeviceLink>,
    state: DeviceState,
    actions: Vec<DeviceAction>,
}

impl DeviceHandler {
    /// `link` is what the registry will point at once the device
    /// authenticates; the handler keeps it alive for the session's lifetime.
    pub fn new(
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn StationDirectory>,
        link: Arc<DeviceLink>,
    ) -> Self {
        Self {
            registry,
            directory,
            link,
            state: DeviceState::Connected,
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn station(&self) -> Option<StationId> {
        match self.state {
            DeviceState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.station().is_some()
    }

    /// Handles the first packet in `buf`.
    ///
    /// Returns the outcome and how many bytes to drop from the front of the
    /// buffer.  [`HandlerResult::Indeterminate`] consumes nothing: read more
    /// and call again with the grown buffer.
    pub fn handle(&mut self, buf: &[u8]) -> (HandlerResult, usize) {
        if self.state == DeviceState::Closed {
            return (HandlerResult::Bad, 0);
        }

        match decode_inbound(buf) {
            Ok((packet, consumed)) => {
                let result = match packet {
                    InPacket::Handshake(p) => self.on_handshake(p),
                    InPacket::Pong => self.on_pong(),
                    InPacket::WeatherStatus(p) => self.on_weather_status(p),
                };
                (result, consumed)
            }
            Err(ProtocolError::InsufficientData { .. }) => (HandlerResult::Indeterminate, 0),
            Err(e) => {
                warn!("rejecting device packet: {e}");
                (HandlerResult::Bad, 0)
            }
        }
    }

    /// Drains the actions recorded since the last call, in order.
    pub fn take_actions(&mut self) -> Vec<DeviceAction> {
        std::mem::take(&mut self.actions)
    }

    /// Releases the registry entry, if any.  Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if let DeviceState::Authenticated(id) = self.state {
            self.registry.leave_device(id);
            info!(station = %id, "device released station");
        }
        self.state = DeviceState::Closed;
    }

    // ── Packet handlers ──────────────────────────────────────────────────────

    fn on_handshake(&mut self, packet: HandshakePacket) -> HandlerResult {
        if let DeviceState::Authenticated(id) = self.state {
            debug!(station = %id, "repeated handshake on authenticated session");
            return self.reject(HandshakeReason::StationIdAlready);
        }

        let Ok(station) = StationId::try_from(packet.station_id) else {
            debug!(raw = packet.station_id, "handshake with out-of-range station id");
            return self.reject(HandshakeReason::StationIdInvalid);
        };
        if !is_well_formed(&packet.uuid) {
            debug!(uuid = %packet.uuid, "handshake with malformed uuid");
            return self.reject(HandshakeReason::UuidInvalidFormat);
        }
        if !self.directory.is_registered(&packet.uuid) {
            info!(uuid = %packet.uuid, "handshake from unregistered device");
            return self.reject(HandshakeReason::UuidNotRegistered);
        }
        if !self.registry.join_device(station, &self.link) {
            info!(station = %station, "station already claimed by another device");
            return self.reject(HandshakeReason::StationIdAlready);
        }

        self.state = DeviceState::Authenticated(station);
        info!(station = %station, uuid = %packet.uuid, "device authenticated");
        self.actions.push(DeviceAction::Send(OutPacket::HandshakeAck));
        self.actions.push(DeviceAction::StartKeepalive);
        HandlerResult::Good
    }

    fn reject(&mut self, reason: HandshakeReason) -> HandlerResult {
        self.actions
            .push(DeviceAction::Send(OutPacket::HandshakeNak(reason)));
        HandlerResult::Good
    }

    fn on_pong(&mut self) -> HandlerResult {
        if !self.is_authenticated() {
            warn!("pong before handshake");
            return HandlerResult::Bad;
        }
        self.actions.push(DeviceAction::PongReceived);
        HandlerResult::Good
    }

    fn on_weather_status(&mut self, packet: WeatherStatusPacket) -> HandlerResult {
        let Some(station_id) = self.station() else {
            warn!("weather status before handshake");
            return HandlerResult::Bad;
        };

        let notification = WeatherStatusNotification {
            station_id,
            temperature: packet.temperature,
            humidity: packet.humidity,
            time: packet.time,
        };

        // The registry lock is released before the notifier runs.
        match self.registry.find_browser_notifier(packet.session) {
            Some(notify) => {
                debug!(session = %packet.session, flag = ?packet.flag, "forwarding reading");
                notify(notification);
            }
            None => debug!(session = %packet.session, "requesting browser is gone; dropping reading"),
        }
        HandlerResult::Good
    }
}

impl Drop for DeviceHandler {
    fn drop(&mut self) {
        self.close();
    }
}

/// A defined version nibble (1 through 8).  The variant bits are not
/// checked, so allow-listed ids minted by non-RFC generators still work.
fn is_well_formed(uuid: &Uuid) -> bool {
    (1..=8).contains(&uuid.get_version_num())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
