//! ThingsBoard integration: device attributes and telemetry over the device HTTP API.

use crate::handler::IntegrationHandler;
use crate::http::DEFAULT_TIMEOUT;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use common::domain::{
    AckEvent, DownlinkRequest, ErrorEvent, JoinEvent, LocationEvent, StatusEvent, TxAckEvent,
    UplinkEvent,
};
use lorix_codec::Variables;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// Device variable holding the ThingsBoard device access token.
pub const ACCESS_TOKEN_VARIABLE: &str = "ThingsBoardAccessToken";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingsBoardSettings {
    pub server: String,
}

impl ThingsBoardSettings {
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.server).map_err(|e| {
            IntegrationError::Config(format!("invalid server '{}': {}", self.server, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IntegrationError::Config(format!(
                "unsupported server scheme '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

pub struct ThingsBoardHandler {
    client: reqwest::Client,
    server: String,
}

impl ThingsBoardHandler {
    pub fn new(client: reqwest::Client, settings: ThingsBoardSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            client,
            server: settings.server.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self, vars, body))]
    async fn send(&self, vars: &Variables, endpoint: &'static str, body: Value) -> Result<()> {
        let token = vars
            .get(ACCESS_TOKEN_VARIABLE)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                IntegrationError::Config(format!("device variable {} is not set", ACCESS_TOKEN_VARIABLE))
            })?;

        let url = format!("{}/api/v1/{}/{}", self.server, token, endpoint);
        let response = self
            .client
            .post(url)
            .timeout(DEFAULT_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntegrationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("thingsboard request sent");
        Ok(())
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&format!("{}_{}", prefix, key), child, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(&format!("{}_{}", prefix, index), child, out);
            }
        }
        Value::Null => {}
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

pub fn uplink_attributes(event: &UplinkEvent) -> Value {
    let mut attributes = Map::new();
    attributes.insert("application_id".to_string(), event.application_id.into());
    attributes.insert("application_name".to_string(), event.application_name.clone().into());
    attributes.insert("device_name".to_string(), event.device_name.clone().into());
    attributes.insert("dev_eui".to_string(), event.dev_eui.to_string().into());
    for (key, value) in &event.tags {
        if let Some(value) = value {
            attributes.insert(key.clone(), value.clone().into());
        }
    }
    Value::Object(attributes)
}

pub fn uplink_telemetry(event: &UplinkEvent) -> Value {
    let mut telemetry = Map::new();
    if let Some(object) = &event.object {
        flatten("data", object, &mut telemetry);
    }
    telemetry.insert("f_cnt".to_string(), event.f_cnt.into());
    if let Some(rssi) = event.max_rssi() {
        telemetry.insert("rssi".to_string(), rssi.into());
    }
    if let Some(snr) = event.max_snr() {
        telemetry.insert("snr".to_string(), snr.into());
    }
    Value::Object(telemetry)
}

pub fn status_telemetry(event: &StatusEvent) -> Value {
    let mut telemetry = Map::new();
    telemetry.insert("status_margin".to_string(), event.margin.into());
    telemetry.insert(
        "status_external_power_source".to_string(),
        event.external_power_source.into(),
    );
    if !event.external_power_source && !event.battery_level_unavailable {
        telemetry.insert("status_battery_level".to_string(), event.battery_level.into());
    }
    Value::Object(telemetry)
}

pub fn location_telemetry(event: &LocationEvent) -> Value {
    serde_json::json!({
        "location_latitude": event.location.latitude,
        "location_longitude": event.location.longitude,
        "location_altitude": event.location.altitude,
    })
}

#[async_trait]
impl IntegrationHandler for ThingsBoardHandler {
    fn name(&self) -> &'static str {
        "thingsboard"
    }

    async fn handle_uplink_event(&self, vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.send(vars, "attributes", uplink_attributes(event)).await?;
        self.send(vars, "telemetry", uplink_telemetry(event)).await
    }

    async fn handle_join_event(&self, _vars: &Variables, _event: &JoinEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_ack_event(&self, _vars: &Variables, _event: &AckEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_error_event(&self, _vars: &Variables, _event: &ErrorEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_status_event(&self, vars: &Variables, event: &StatusEvent) -> Result<()> {
        self.send(vars, "telemetry", status_telemetry(event)).await
    }

    async fn handle_location_event(&self, vars: &Variables, event: &LocationEvent) -> Result<()> {
        self.send(vars, "telemetry", location_telemetry(event)).await
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, _event: &TxAckEvent) -> Result<()> {
        Ok(())
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
