//! The static device allow-list.
//!
//! Devices authenticate by presenting a UUID that an operator has listed in
//! the configuration file.  The same read-only directory also supplies the
//! display name of each station for browser responses.
//!
//! Sessions depend on the [`StationDirectory`] trait rather than on
//! [`AllowList`] directly, so handler tests can substitute a mock.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;
use weather_core::StationId;

use crate::domain::config::GatewayConfig;

/// Read-only lookup of approved devices and station names.
#[cfg_attr(test, mockall::automock)]
pub trait StationDirectory: Send + Sync {
    /// Whether `uuid` may authenticate as a device.
    fn is_registered(&self, uuid: &Uuid) -> bool;

    /// Display name of `id`.
    fn station_name(&self, id: StationId) -> String;
}

/// [`StationDirectory`] backed by the configuration file, loaded once at
/// startup and never mutated.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    devices: HashSet<Uuid>,
    names: HashMap<StationId, String>,
}

impl AllowList {
    pub fn new(
        devices: impl IntoIterator<Item = Uuid>,
        names: impl IntoIterator<Item = (StationId, String)>,
    ) -> Self {
        Self {
            devices: devices.into_iter().collect(),
            names: names.into_iter().collect(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.devices.iter().map(|d| d.uuid),
            config.stations.iter().map(|s| (s.id, s.name.clone())),
        )
    }

    /// Number of allow-listed devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl StationDirectory for AllowList {
    fn is_registered(&self, uuid: &Uuid) -> bool {
        self.devices.contains(uuid)
    }

    fn station_name(&self, id: StationId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.default_name().to_string())
    }
}
