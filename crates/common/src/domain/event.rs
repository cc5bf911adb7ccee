//! Application events delivered to integrations.
//!
//! JSON field names follow the wire format consumed by integration back-ends
//! (`applicationID`, `devEUI`, `rxInfo`, ...).

use crate::domain::{base64_bytes, DevAddr, DevEui, GatewayId, Tags};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Per-event context propagated from ingress to every delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: Uuid,
}

impl EventContext {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
        }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Up,
    Join,
    Ack,
    Error,
    Status,
    Location,
    #[serde(rename = "txack")]
    TxAck,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Up,
        EventKind::Join,
        EventKind::Ack,
        EventKind::Error,
        EventKind::Status,
        EventKind::Location,
        EventKind::TxAck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Up => "up",
            EventKind::Join => "join",
            EventKind::Ack => "ack",
            EventKind::Error => "error",
            EventKind::Status => "status",
            EventKind::Location => "location",
            EventKind::TxAck => "txack",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationSource {
    #[default]
    Unknown,
    Gps,
    Config,
    GeoResolverTdoa,
    GeoResolverRssi,
    GeoResolverGnss,
    GeoResolverWifi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    #[serde(default)]
    pub source: LocationSource,
    #[serde(default)]
    pub accuracy: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxInfo {
    #[serde(rename = "gatewayID")]
    pub gateway_id: GatewayId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub rssi: i32,
    #[serde(rename = "loRaSNR")]
    pub lora_snr: f64,
    pub channel: u32,
    pub rf_chain: u32,
    pub board: u32,
    pub antenna: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoraModulationInfo {
    pub bandwidth: u32,
    pub spreading_factor: u32,
    pub code_rate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub frequency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_modulation_info: Option<LoraModulationInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Unknown,
    Otaa,
    DataUpFcnt,
    DataUpMic,
    DeviceQueueItemSize,
    DeviceQueueItemFcnt,
    UplinkCodec,
    DownlinkCodec,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Unknown => "UNKNOWN",
            ErrorType::Otaa => "OTAA",
            ErrorType::DataUpFcnt => "DATA_UP_FCNT",
            ErrorType::DataUpMic => "DATA_UP_MIC",
            ErrorType::DeviceQueueItemSize => "DEVICE_QUEUE_ITEM_SIZE",
            ErrorType::DeviceQueueItemFcnt => "DEVICE_QUEUE_ITEM_FCNT",
            ErrorType::UplinkCodec => "UPLINK_CODEC",
            ErrorType::DownlinkCodec => "DOWNLINK_CODEC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<DevAddr>,
    pub rx_info: Vec<RxInfo>,
    pub tx_info: TxInfo,
    pub adr: bool,
    pub dr: u8,
    #[serde(rename = "fCnt")]
    pub f_cnt: u32,
    #[serde(rename = "fPort")]
    pub f_port: u8,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    pub tags: Tags,
}

impl UplinkEvent {
    /// Earliest gateway receive time, if any gateway reported one.
    pub fn earliest_rx_time(&self) -> Option<DateTime<Utc>> {
        self.rx_info.iter().filter_map(|rx| rx.time).min()
    }

    pub fn max_rssi(&self) -> Option<i32> {
        self.rx_info.iter().map(|rx| rx.rssi).max()
    }

    pub fn max_snr(&self) -> Option<f64> {
        self.rx_info
            .iter()
            .map(|rx| rx.lora_snr)
            .fold(None, |acc, snr| match acc {
                Some(max) if max >= snr => Some(max),
                _ => Some(snr),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    pub dev_addr: DevAddr,
    pub rx_info: Vec<RxInfo>,
    pub tx_info: TxInfo,
    pub dr: u8,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    pub acknowledged: bool,
    #[serde(rename = "fCnt")]
    pub f_cnt: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub error: String,
    #[serde(rename = "fCnt")]
    pub f_cnt: u32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    pub margin: i32,
    pub external_power_source: bool,
    pub battery_level_unavailable: bool,
    pub battery_level: f32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    pub location: Location,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxAckEvent {
    #[serde(rename = "applicationID")]
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: DevEui,
    #[serde(rename = "fCnt")]
    pub f_cnt: u32,
    #[serde(rename = "gatewayID")]
    pub gateway_id: GatewayId,
    pub tx_info: TxInfo,
    pub tags: Tags,
}

/// Any event an integration can receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IntegrationEvent {
    Uplink(UplinkEvent),
    Join(JoinEvent),
    Ack(AckEvent),
    Error(ErrorEvent),
    Status(StatusEvent),
    Location(LocationEvent),
    TxAck(TxAckEvent),
}

macro_rules! common_field {
    ($self:ident, $field:ident) => {
        match $self {
            IntegrationEvent::Uplink(e) => &e.$field,
            IntegrationEvent::Join(e) => &e.$field,
            IntegrationEvent::Ack(e) => &e.$field,
            IntegrationEvent::Error(e) => &e.$field,
            IntegrationEvent::Status(e) => &e.$field,
            IntegrationEvent::Location(e) => &e.$field,
            IntegrationEvent::TxAck(e) => &e.$field,
        }
    };
}

impl IntegrationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            IntegrationEvent::Uplink(_) => EventKind::Up,
            IntegrationEvent::Join(_) => EventKind::Join,
            IntegrationEvent::Ack(_) => EventKind::Ack,
            IntegrationEvent::Error(_) => EventKind::Error,
            IntegrationEvent::Status(_) => EventKind::Status,
            IntegrationEvent::Location(_) => EventKind::Location,
            IntegrationEvent::TxAck(_) => EventKind::TxAck,
        }
    }

    pub fn application_id(&self) -> i64 {
        *common_field!(self, application_id)
    }

    pub fn application_name(&self) -> &str {
        common_field!(self, application_name)
    }

    pub fn device_name(&self) -> &str {
        common_field!(self, device_name)
    }

    pub fn dev_eui(&self) -> DevEui {
        *common_field!(self, dev_eui)
    }

    pub fn tags(&self) -> &Tags {
        common_field!(self, tags)
    }
}
