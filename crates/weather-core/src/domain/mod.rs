//! Domain value types shared by the gateway and by device simulators.
//!
//! Nothing in here performs I/O.  The types are small `Copy` values that are
//! produced by the protocol codec and consumed by the gateway's sessions.

pub mod reading;
pub mod station;

pub use reading::{TransportFlag, WeatherStatusNotification};
pub use station::{StationId, StationIdError};
