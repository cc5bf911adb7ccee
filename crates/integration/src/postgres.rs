//! PostgreSQL integration: one table per event kind.

use crate::handler::IntegrationHandler;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::{
    AckEvent, DownlinkRequest, ErrorEvent, JoinEvent, LocationEvent, StatusEvent, TxAckEvent,
    UplinkEvent,
};
use common::postgres::PostgresClient;
use lorix_codec::Variables;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_postgres::types::{Json, ToSql};
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresIntegrationConfig {
    pub dsn: String,
    pub max_pool_size: usize,
}

impl Default for PostgresIntegrationConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_pool_size: 5,
        }
    }
}

pub struct PostgresHandler {
    client: PostgresClient,
}

impl PostgresHandler {
    /// Connects and checks the database is reachable. The event tables must already
    /// exist; this handler never issues DDL.
    pub async fn connect(config: &PostgresIntegrationConfig) -> Result<Self> {
        let client = PostgresClient::from_dsn(&config.dsn, config.max_pool_size)
            .map_err(|e| IntegrationError::Config(e.to_string()))?;
        client.ping().await.map_err(IntegrationError::transport)?;
        info!("postgresql integration ready");
        Ok(Self { client })
    }

    async fn insert(&self, statement: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(IntegrationError::transport)?;
        conn.execute(statement, params)
            .await
            .map_err(IntegrationError::transport)?;
        debug!("event row inserted");
        Ok(())
    }
}

/// Earliest gateway receive time, falling back to server time.
fn uplink_received_at(event: &UplinkEvent) -> DateTime<Utc> {
    event.earliest_rx_time().unwrap_or_else(Utc::now)
}

#[async_trait]
impl IntegrationHandler for PostgresHandler {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_uplink_event(&self, _vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.insert(
            "INSERT INTO device_up (id, received_at, dev_eui, device_name, application_id, application_name,
                frequency, dr, adr, f_cnt, f_port, tags, data, rx_info, object)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            &[
                &Uuid::new_v4(),
                &uplink_received_at(event),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &i64::from(event.tx_info.frequency),
                &i16::from(event.dr),
                &event.adr,
                &i64::from(event.f_cnt),
                &i16::from(event.f_port),
                &Json(&event.tags),
                &event.data,
                &Json(&event.rx_info),
                &event.object.as_ref().map(Json),
            ],
        )
        .await
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_join_event(&self, _vars: &Variables, event: &JoinEvent) -> Result<()> {
        self.insert(
            "INSERT INTO device_join (id, received_at, dev_eui, device_name, application_id, application_name,
                tags, dev_addr)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &Uuid::new_v4(),
                &Utc::now(),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &Json(&event.tags),
                &event.dev_addr.as_bytes().as_slice(),
            ],
        )
        .await
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_ack_event(&self, _vars: &Variables, event: &AckEvent) -> Result<()> {
        self.insert(
            "INSERT INTO device_ack (id, received_at, dev_eui, device_name, application_id, application_name,
                tags, acknowledged, f_cnt)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &Uuid::new_v4(),
                &Utc::now(),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &Json(&event.tags),
                &event.acknowledged,
                &i64::from(event.f_cnt),
            ],
        )
        .await
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_error_event(&self, _vars: &Variables, event: &ErrorEvent) -> Result<()> {
        self.insert(
            "INSERT INTO device_error (id, received_at, dev_eui, device_name, application_id, application_name,
                tags, type, error, f_cnt)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &Uuid::new_v4(),
                &Utc::now(),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &Json(&event.tags),
                &event.error_type.as_str(),
                &event.error,
                &i64::from(event.f_cnt),
            ],
        )
        .await
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_status_event(&self, _vars: &Variables, event: &StatusEvent) -> Result<()> {
        let margin = i16::try_from(event.margin)
            .map_err(|_| IntegrationError::Config(format!("margin out of range: {}", event.margin)))?;
        self.insert(
            "INSERT INTO device_status (id, received_at, dev_eui, device_name, application_id, application_name,
                tags, margin, external_power_source, battery_level_unavailable, battery_level)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &Uuid::new_v4(),
                &Utc::now(),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &Json(&event.tags),
                &margin,
                &event.external_power_source,
                &event.battery_level_unavailable,
                &event.battery_level,
            ],
        )
        .await
    }

    #[instrument(skip(self, _vars, event), fields(dev_eui = %event.dev_eui))]
    async fn handle_location_event(&self, _vars: &Variables, event: &LocationEvent) -> Result<()> {
        let location = &event.location;
        let geohash = geohash::encode(
            geohash::Coord {
                x: location.longitude,
                y: location.latitude,
            },
            12,
        )
        .map_err(|e| IntegrationError::Config(e.to_string()))?;
        let accuracy = i32::try_from(location.accuracy).unwrap_or(i32::MAX);

        self.insert(
            "INSERT INTO device_location (id, received_at, dev_eui, device_name, application_id, application_name,
                tags, altitude, latitude, longitude, geohash, accuracy)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &Uuid::new_v4(),
                &Utc::now(),
                &event.dev_eui.as_bytes().as_slice(),
                &event.device_name,
                &event.application_id,
                &event.application_name,
                &Json(&event.tags),
                &location.altitude,
                &location.latitude,
                &location.longitude,
                &geohash,
                &accuracy,
            ],
        )
        .await
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, _event: &TxAckEvent) -> Result<()> {
        Ok(())
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> Result<()> {
        self.client.close();
        Ok(())
    }
}
