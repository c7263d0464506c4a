//! Station identifiers.
//!
//! Every physical weather station has a small numeric identity.  The valid
//! range is closed: [`StationId::MAX`] is the exclusive upper bound and is
//! itself never a valid station.  A device that claims an id at or above the
//! bound is rejected during the handshake.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a raw byte does not name a known station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("station id {0} is out of range (must be below {})", StationId::MAX)]
pub struct StationIdError(pub u8);

/// Identity of one physical weather station.
///
/// Serialized as its raw `u8` value so it can appear directly in TOML
/// configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StationId {
    Goe = 0,
    Wf = 1,
    Bs = 2,
}

impl StationId {
    /// Exclusive upper bound of the valid id range.
    pub const MAX: u8 = 3;

    /// Every valid station, in ascending id order.
    pub const ALL: [StationId; 3] = [StationId::Goe, StationId::Wf, StationId::Bs];

    /// Raw wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Name used when the configuration does not provide one.
    pub fn default_name(self) -> &'static str {
        match self {
            StationId::Goe => "Goe",
            StationId::Wf => "Wf",
            StationId::Bs => "Bs",
        }
    }
}

impl TryFrom<u8> for StationId {
    type Error = StationIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StationId::Goe),
            1 => Ok(StationId::Wf),
            2 => Ok(StationId::Bs),
            other => Err(StationIdError(other)),
        }
    }
}

impl From<StationId> for u8 {
    fn from(id: StationId) -> Self {
        id.as_u8()
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
