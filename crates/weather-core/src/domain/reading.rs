//! Weather readings and the transport tag that routes them back.

/// The transport a browser session arrived on.
///
/// A device echoes this byte back inside its `WeatherStatus` reply so the
/// gateway knows which family of browser sessions the reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportFlag {
    Plain = 0x01,
    Secure = 0x02,
}

impl TryFrom<u8> for TransportFlag {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(TransportFlag::Plain),
            0x02 => Ok(TransportFlag::Secure),
            _ => Err(()),
        }
    }
}

/// One decoded reading, produced by a device session and consumed exactly
/// once by the browser session that asked for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherStatusNotification {
    pub station_id: crate::StationId,
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Unix timestamp (seconds) at which the device sampled the reading.
    pub time: u32,
}
