use crate::domain::{
    AesKey, BatteryState, DevAddr, DevEui, Device, DeviceActivation, DeviceRepository,
    DeviceStatus, DomainError, DomainResult, Location, Tags, UplinkDeviceUpdate,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::types::Json;
use tokio_postgres::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const BATTERY_EXTERNAL_POWER: &str = "EXTERNAL_POWER";
const BATTERY_LEVEL: &str = "LEVEL";
const BATTERY_UNAVAILABLE: &str = "UNAVAILABLE";

/// Device row as stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub dev_eui: Vec<u8>,
    pub application_id: i64,
    pub device_profile_id: Uuid,
    pub name: String,
    pub dev_addr: Option<Vec<u8>>,
    pub app_s_key: Option<Vec<u8>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub dr: Option<i16>,
    pub battery_state: Option<String>,
    pub battery_level: Option<f32>,
    pub margin: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub tags: Tags,
    pub variables: Tags,
}

impl DeviceRow {
    fn from_row(row: &Row) -> Self {
        let tags: Json<Tags> = row.get(14);
        let variables: Json<Tags> = row.get(15);
        Self {
            dev_eui: row.get(0),
            application_id: row.get(1),
            device_profile_id: row.get(2),
            name: row.get(3),
            dev_addr: row.get(4),
            app_s_key: row.get(5),
            last_seen_at: row.get(6),
            dr: row.get(7),
            battery_state: row.get(8),
            battery_level: row.get(9),
            margin: row.get(10),
            latitude: row.get(11),
            longitude: row.get(12),
            altitude: row.get(13),
            tags: tags.0,
            variables: variables.0,
        }
    }
}

impl TryFrom<DeviceRow> for Device {
    type Error = DomainError;

    fn try_from(row: DeviceRow) -> DomainResult<Self> {
        let activation = activation_from_columns(row.dev_addr.as_deref(), row.app_s_key.as_deref())?;

        let battery = match (row.battery_state.as_deref(), row.battery_level) {
            (Some(BATTERY_EXTERNAL_POWER), _) => Some(BatteryState::ExternalPower),
            (Some(BATTERY_LEVEL), Some(level)) => Some(BatteryState::Level(level)),
            (Some(BATTERY_UNAVAILABLE), _) => Some(BatteryState::Unavailable),
            _ => None,
        };
        let status = match (row.margin, battery) {
            (Some(margin), Some(battery)) => Some(DeviceStatus { margin, battery }),
            _ => None,
        };

        Ok(Device {
            dev_eui: DevEui::from_slice(&row.dev_eui)?,
            application_id: row.application_id,
            device_profile_id: row.device_profile_id,
            name: row.name,
            activation,
            last_seen_at: row.last_seen_at,
            dr: row.dr.and_then(|dr| u8::try_from(dr).ok()),
            status,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            tags: row.tags,
            variables: row.variables,
        })
    }
}

/// A zero DevAddr means the device was never activated.
fn activation_from_columns(
    dev_addr: Option<&[u8]>,
    app_s_key: Option<&[u8]>,
) -> DomainResult<Option<DeviceActivation>> {
    match (dev_addr, app_s_key) {
        (Some(dev_addr), Some(app_s_key)) => {
            let dev_addr = DevAddr::from_slice(dev_addr)?;
            if dev_addr.is_zero() {
                return Ok(None);
            }
            Ok(Some(DeviceActivation {
                dev_addr,
                app_s_key: AesKey::from_slice(app_s_key)?,
            }))
        }
        _ => Ok(None),
    }
}

fn battery_columns(battery: &BatteryState) -> (&'static str, Option<f32>) {
    match battery {
        BatteryState::ExternalPower => (BATTERY_EXTERNAL_POWER, None),
        BatteryState::Level(level) => (BATTERY_LEVEL, Some(*level)),
        BatteryState::Unavailable => (BATTERY_UNAVAILABLE, None),
    }
}

#[derive(Clone)]
pub struct PostgresDeviceRepository {
    client: PostgresClient,
}

impl PostgresDeviceRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn get_device(&self, dev_eui: &DevEui) -> DomainResult<Option<Device>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT dev_eui, application_id, device_profile_id, name, dev_addr, app_s_key,
                        last_seen_at, dr, device_status_battery_state, device_status_battery,
                        device_status_margin, latitude, longitude, altitude, tags, variables
                 FROM device
                 WHERE dev_eui = $1",
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.map(|row| Device::try_from(DeviceRow::from_row(&row)))
            .transpose()
    }

    #[instrument(skip(self, update), fields(dev_eui = %dev_eui))]
    async fn record_uplink(
        &self,
        dev_eui: &DevEui,
        update: &UplinkDeviceUpdate,
    ) -> DomainResult<bool> {
        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let key = dev_eui.as_bytes().as_slice();
        let row = tx
            .query_opt(
                "SELECT dev_addr, app_s_key FROM device WHERE dev_eui = $1 FOR UPDATE",
                &[&key],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?
            .ok_or_else(|| DomainError::DeviceNotFound(dev_eui.to_string()))?;

        let dev_addr: Option<Vec<u8>> = row.get(0);
        let app_s_key: Option<Vec<u8>> = row.get(1);
        let stored = activation_from_columns(dev_addr.as_deref(), app_s_key.as_deref())?;
        let dr = i16::from(update.dr);

        let rotated = match &update.activation {
            Some(activation) if stored.as_ref() != Some(activation) => {
                tx.execute(
                    "UPDATE device
                     SET last_seen_at = $2, dr = $3, dev_addr = $4, app_s_key = $5
                     WHERE dev_eui = $1",
                    &[
                        &key,
                        &update.last_seen_at,
                        &dr,
                        &activation.dev_addr.as_bytes().as_slice(),
                        &activation.app_s_key.as_bytes().as_slice(),
                    ],
                )
                .await
                .map_err(|e| DomainError::RepositoryError(e.into()))?;
                true
            }
            _ => {
                tx.execute(
                    "UPDATE device SET last_seen_at = $2, dr = $3 WHERE dev_eui = $1",
                    &[&key, &update.last_seen_at, &dr],
                )
                .await
                .map_err(|e| DomainError::RepositoryError(e.into()))?;
                false
            }
        };

        tx.commit()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if rotated {
            info!(dev_eui = %dev_eui, "device session rotated");
        } else {
            debug!(dev_eui = %dev_eui, "device last-seen updated");
        }
        Ok(rotated)
    }

    #[instrument(skip(self, status), fields(dev_eui = %dev_eui))]
    async fn update_status(&self, dev_eui: &DevEui, status: &DeviceStatus) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let (state, level) = battery_columns(&status.battery);
        let rows_affected = conn
            .execute(
                "UPDATE device
                 SET device_status_margin = $2, device_status_battery_state = $3,
                     device_status_battery = $4
                 WHERE dev_eui = $1",
                &[&dev_eui.as_bytes().as_slice(), &status.margin, &state, &level],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if rows_affected == 0 {
            return Err(DomainError::DeviceNotFound(dev_eui.to_string()));
        }
        debug!(dev_eui = %dev_eui, margin = status.margin, "device status updated");
        Ok(())
    }

    #[instrument(skip(self, location), fields(dev_eui = %dev_eui))]
    async fn update_location(&self, dev_eui: &DevEui, location: &Location) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows_affected = conn
            .execute(
                "UPDATE device SET latitude = $2, longitude = $3, altitude = $4 WHERE dev_eui = $1",
                &[
                    &dev_eui.as_bytes().as_slice(),
                    &location.latitude,
                    &location.longitude,
                    &location.altitude,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        if rows_affected == 0 {
            return Err(DomainError::DeviceNotFound(dev_eui.to_string()));
        }
        debug!(dev_eui = %dev_eui, "device location updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_dev_addr_means_not_activated() {
        let activation = activation_from_columns(Some(&[0; 4]), Some(&[0; 16])).unwrap();
        assert_eq!(activation, None);

        let activation = activation_from_columns(Some(&[1, 2, 3, 4]), Some(&[7; 16]))
            .unwrap()
            .unwrap();
        assert_eq!(activation.dev_addr.to_string(), "01020304");
    }

    #[test]
    fn test_battery_columns() {
        assert_eq!(battery_columns(&BatteryState::ExternalPower), ("EXTERNAL_POWER", None));
        assert_eq!(battery_columns(&BatteryState::Level(42.5)), ("LEVEL", Some(42.5)));
        assert_eq!(battery_columns(&BatteryState::Unavailable), ("UNAVAILABLE", None));
    }
}
