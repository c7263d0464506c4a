//! Browser protocol engine.
//!
//! Like the device engine, [`BrowserHandler`] never performs I/O.  The browser
//! session feeds it the bytes of incoming WebSocket messages; it peels off one
//! length-prefixed JSON request at a time, acts on it through the registry,
//! and queues any direct replies for the session to write.
//!
//! # Requests
//!
//! | id | request             | effect                                              |
//! |----|---------------------|-----------------------------------------------------|
//! | 1  | `AvailableStations` | immediate reply listing live stations               |
//! | 0  | `WeatherStatus`     | one `WeatherStatusRequest` per live listed station  |
//!
//! Readings requested with id 0 do not come back through this handler.  Each
//! device session delivers its reply independently through the notifier the
//! browser session registered, so replies for different stations arrive in
//! whatever order the devices answer.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use weather_core::{decode_frame, HandlerResult, ProtocolError, StationId, TransportFlag};

use crate::application::registry::SessionRegistry;
use crate::domain::messages::{BrowserRequest, BrowserResponse, StationInfo};
use crate::domain::StationDirectory;

pub struct BrowserHandler {
    session: Uuid,
    flag: TransportFlag,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn StationDirectory>,
    max_payload: usize,
    responses: Vec<BrowserResponse>,
}

impl BrowserHandler {
    pub fn new(
        session: Uuid,
        flag: TransportFlag,
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn StationDirectory>,
        max_payload: usize,
    ) -> Self {
        Self {
            session,
            flag,
            registry,
            directory,
            max_payload,
            responses: Vec::new(),
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Handles the first framed request in `buf`.
    ///
    /// Returns the outcome and how many bytes to drop from the front of the
    /// buffer.
    pub fn handle(&mut self, buf: &[u8]) -> (HandlerResult, usize) {
        let (payload, consumed) = match decode_frame(buf, self.max_payload) {
            Ok(frame) => frame,
            Err(ProtocolError::InsufficientData { .. }) => return (HandlerResult::Indeterminate, 0),
            Err(e @ ProtocolError::PayloadTooBig { .. }) => {
                warn!("closing browser session: {e}");
                return (HandlerResult::PayloadTooBig, 0);
            }
            Err(e) => {
                warn!("rejecting browser frame: {e}");
                return (HandlerResult::Bad, 0);
            }
        };

        match BrowserRequest::parse(payload) {
            Ok(request) => {
                self.dispatch(request);
                (HandlerResult::Good, consumed)
            }
            Err(e) => {
                warn!("rejecting browser request: {e}");
                (HandlerResult::Bad, consumed)
            }
        }
    }

    /// Drains the replies produced since the last call, in order.
    pub fn take_responses(&mut self) -> Vec<BrowserResponse> {
        std::mem::take(&mut self.responses)
    }

    fn dispatch(&mut self, request: BrowserRequest) {
        match request {
            BrowserRequest::AvailableStations => {
                let stations = self
                    .registry
                    .list_device_ids()
                    .into_iter()
                    .map(|id| StationInfo {
                        station_id: id.as_u8(),
                        station_name: self.directory.station_name(id),
                    })
                    .collect();
                self.responses
                    .push(BrowserResponse::available_stations(stations));
            }
            BrowserRequest::WeatherStatus { station_ids } => {
                let forwarded = self.forward_weather_requests(&station_ids);
                debug!(
                    requested = station_ids.len(),
                    forwarded, "weather status request fanned out"
                );
            }
        }
    }

    /// Sends a request to every listed station that has a live device and
    /// returns how many were sent.  Unknown and offline stations are skipped.
    fn forward_weather_requests(&self, station_ids: &[u8]) -> usize {
        let mut forwarded = 0;
        for &raw in station_ids {
            let Ok(id) = StationId::try_from(raw) else {
                debug!(raw, "skipping unknown station id");
                continue;
            };
            match self.registry.find_device(id) {
                Some(device) => {
                    if device.request_weather_status(self.session, self.flag) {
                        forwarded += 1;
                    }
                }
                None => debug!(station = %id, "station offline; skipping"),
            }
        }
        forwarded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
