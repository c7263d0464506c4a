//! JSON message types for the browser-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Browser → Gateway:  [len:u16 LE][JSON]  →  BrowserRequest
//! Gateway → Browser:  BrowserResponse     →  JSON text message
//! ```
//!
//! # JSON discriminant
//!
//! Requests and responses carry a numeric `"id"` field instead of a string
//! tag.  Serde's internally tagged enums only support string tags, so requests
//! are first parsed into a flat private struct and then converted.
//!
//! ```json
//! {"id":1}
//! {"id":0,"stationIds":[0,2]}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use weather_core::WeatherStatusNotification;

/// Request id asking for readings from a list of stations.
pub const WEATHER_STATUS_ID: u8 = 0;
/// Request id asking which stations are currently connected.
pub const AVAILABLE_STATIONS_ID: u8 = 1;

/// Reasons a browser payload is not a valid request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown request id {0}")]
    UnknownId(u64),

    #[error("request {id} is missing field `{field}`")]
    MissingField { id: u8, field: &'static str },
}

// ── Browser → Gateway ─────────────────────────────────────────────────────────

/// A decoded browser request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserRequest {
    /// Forward a reading request to each listed station.  Ids are kept raw so
    /// unknown or out-of-range stations can be skipped silently; entries that
    /// are not even a byte-sized integer are dropped during parsing.
    WeatherStatus { station_ids: Vec<u8> },
    AvailableStations,
}

#[derive(Deserialize)]
struct RawRequest {
    id: u64,
    #[serde(rename = "stationIds")]
    station_ids: Option<Vec<serde_json::Value>>,
}

impl BrowserRequest {
    /// Parses one framed payload.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] for invalid JSON, an unknown `id`, or a
    /// `WeatherStatus` request without `stationIds`.
    pub fn parse(payload: &[u8]) -> Result<Self, RequestError> {
        let raw: RawRequest = serde_json::from_slice(payload)?;
        match raw.id {
            id if id == u64::from(WEATHER_STATUS_ID) => {
                let station_ids = raw.station_ids.ok_or(RequestError::MissingField {
                    id: WEATHER_STATUS_ID,
                    field: "stationIds",
                })?;
                let station_ids = station_ids
                    .iter()
                    .filter_map(serde_json::Value::as_u64)
                    .filter_map(|id| u8::try_from(id).ok())
                    .collect();
                Ok(BrowserRequest::WeatherStatus { station_ids })
            }
            id if id == u64::from(AVAILABLE_STATIONS_ID) => Ok(BrowserRequest::AvailableStations),
            other => Err(RequestError::UnknownId(other)),
        }
    }
}

// ── Gateway → Browser ─────────────────────────────────────────────────────────

/// One entry of an `AvailableStations` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationInfo {
    pub station_id: u8,
    pub station_name: String,
}

/// Messages the gateway sends to a browser.
///
/// ```json
/// {"id":1,"stations":[{"stationId":1,"stationName":"Goe"}]}
/// {"id":0,"stationId":1,"temperature":21.5,"humidity":40.0,"time":1600000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BrowserResponse {
    AvailableStations {
        id: u8,
        stations: Vec<StationInfo>,
    },
    #[serde(rename_all = "camelCase")]
    WeatherStatus {
        id: u8,
        station_id: u8,
        temperature: f32,
        humidity: f32,
        time: u32,
    },
}

impl BrowserResponse {
    pub fn available_stations(stations: Vec<StationInfo>) -> Self {
        BrowserResponse::AvailableStations {
            id: AVAILABLE_STATIONS_ID,
            stations,
        }
    }

    pub fn weather_status(notification: &WeatherStatusNotification) -> Self {
        BrowserResponse::WeatherStatus {
            id: WEATHER_STATUS_ID,
            station_id: notification.station_id.as_u8(),
            temperature: notification.temperature,
            humidity: notification.humidity,
            time: notification.time,
        }
    }

    /// Serializes to the JSON text sent in a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Propagates any `serde_json` failure.  Non-finite floats are written as
    /// `null`, not rejected.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
