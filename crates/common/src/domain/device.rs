use crate::domain::{AesKey, DevAddr, DevEui, DomainResult, Location};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorix_codec::Variables;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// String map whose values may be explicitly null.
pub type Tags = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub dev_eui: DevEui,
    pub application_id: i64,
    pub device_profile_id: Uuid,
    pub name: String,
    /// Current session; `None` until the first activation is observed.
    pub activation: Option<DeviceActivation>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub dr: Option<u8>,
    pub status: Option<DeviceStatus>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub tags: Tags,
    pub variables: Tags,
}

impl Device {
    /// Variables with a value, as handed to codecs and integrations.
    pub fn variables(&self) -> Variables {
        self.variables
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// DevAddr and AppSKey of the active session. Both are rotated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceActivation {
    pub dev_addr: DevAddr,
    pub app_s_key: AesKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryState {
    ExternalPower,
    Level(f32),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub margin: i32,
    pub battery: BatteryState,
}

/// Device mutations produced by one uplink, persisted in a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkDeviceUpdate {
    pub last_seen_at: DateTime<Utc>,
    pub dr: u8,
    pub activation: Option<DeviceActivation>,
}

/// Repository trait for device state owned by the pipeline
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get_device(&self, dev_eui: &DevEui) -> DomainResult<Option<Device>>;

    /// Applies last-seen and, when it differs from the stored one, the new activation.
    ///
    /// Returns `true` when the session was rotated.
    async fn record_uplink(
        &self,
        dev_eui: &DevEui,
        update: &UplinkDeviceUpdate,
    ) -> DomainResult<bool>;

    async fn update_status(&self, dev_eui: &DevEui, status: &DeviceStatus) -> DomainResult<()>;

    async fn update_location(&self, dev_eui: &DevEui, location: &Location) -> DomainResult<()>;
}
