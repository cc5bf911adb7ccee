use crate::domain::{
    device_status, ActivationContext, DeviceError, DownlinkAck, GatewayStats, KeyEnvelope,
    TxAck, UplinkData,
};
use chrono::{DateTime, Utc};
use common::domain::{
    DevAddr, DevEui, DeviceStatus, DomainError, DomainResult, ErrorType, GatewayId, Location,
    LocationSource, LoraModulationInfo, RxInfo, TxInfo,
};
use lorix_proto::v1 as proto;
use prost_types::Timestamp;

fn missing(field: &str) -> DomainError {
    DomainError::ValidationError(format!("{} is required", field))
}

fn to_u8(field: &str, value: u32) -> DomainResult<u8> {
    u8::try_from(value).map_err(|_| {
        DomainError::ValidationError(format!("{} must fit in one byte, got {}", field, value))
    })
}

/// Timestamps outside chrono's range are treated as absent.
pub fn timestamp_to_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?))
}

pub fn to_location_source(source: proto::LocationSource) -> LocationSource {
    match source {
        proto::LocationSource::Unknown => LocationSource::Unknown,
        proto::LocationSource::Gps => LocationSource::Gps,
        proto::LocationSource::Config => LocationSource::Config,
        proto::LocationSource::GeoResolverTdoa => LocationSource::GeoResolverTdoa,
        proto::LocationSource::GeoResolverRssi => LocationSource::GeoResolverRssi,
        proto::LocationSource::GeoResolverGnss => LocationSource::GeoResolverGnss,
        proto::LocationSource::GeoResolverWifi => LocationSource::GeoResolverWifi,
    }
}

pub fn to_location(location: proto::Location) -> Location {
    Location {
        latitude: location.latitude,
        longitude: location.longitude,
        altitude: location.altitude,
        source: to_location_source(location.source()),
        accuracy: location.accuracy,
    }
}

pub fn to_error_type(error_type: proto::ErrorType) -> ErrorType {
    match error_type {
        proto::ErrorType::Generic => ErrorType::Unknown,
        proto::ErrorType::Otaa => ErrorType::Otaa,
        proto::ErrorType::DataUpFcnt => ErrorType::DataUpFcnt,
        proto::ErrorType::DataUpMic => ErrorType::DataUpMic,
        proto::ErrorType::DeviceQueueItemSize => ErrorType::DeviceQueueItemSize,
        proto::ErrorType::DeviceQueueItemFcnt => ErrorType::DeviceQueueItemFcnt,
    }
}

pub fn to_rx_info(rx: proto::RxInfo) -> DomainResult<RxInfo> {
    Ok(RxInfo {
        gateway_id: GatewayId::from_slice(&rx.gateway_id)?,
        time: timestamp_to_datetime(rx.time),
        rssi: rx.rssi,
        lora_snr: rx.lora_snr,
        channel: rx.channel,
        rf_chain: rx.rf_chain,
        board: rx.board,
        antenna: rx.antenna,
        location: rx.location.map(to_location),
    })
}

pub fn to_tx_info(tx: Option<proto::TxInfo>) -> DomainResult<TxInfo> {
    let tx = tx.ok_or_else(|| missing("tx_info"))?;
    Ok(TxInfo {
        frequency: tx.frequency,
        lora_modulation_info: tx.lora_modulation_info.map(|m| LoraModulationInfo {
            bandwidth: m.bandwidth,
            spreading_factor: m.spreading_factor,
            code_rate: m.code_rate,
        }),
    })
}

fn to_activation(ctx: proto::DeviceActivationContext) -> DomainResult<ActivationContext> {
    let key = ctx
        .app_s_key
        .ok_or_else(|| missing("device_activation_context.app_s_key"))?;
    Ok(ActivationContext {
        dev_addr: DevAddr::from_slice(&ctx.dev_addr)?,
        app_s_key: KeyEnvelope {
            kek_label: key.kek_label,
            aes_key: key.aes_key,
        },
    })
}

pub fn to_uplink(req: proto::HandleUplinkDataRequest) -> DomainResult<(DevEui, UplinkData)> {
    let dev_eui = DevEui::from_slice(&req.dev_eui)?;
    let uplink = UplinkData {
        f_cnt: req.f_cnt,
        f_port: to_u8("f_port", req.f_port)?,
        dr: to_u8("dr", req.dr)?,
        adr: req.adr,
        data: req.data,
        rx_info: req
            .rx_info
            .into_iter()
            .map(to_rx_info)
            .collect::<DomainResult<Vec<_>>>()?,
        tx_info: to_tx_info(req.tx_info)?,
        activation: req
            .device_activation_context
            .map(to_activation)
            .transpose()?,
    };
    Ok((dev_eui, uplink))
}

pub fn to_downlink_ack(req: proto::HandleDownlinkAckRequest) -> DomainResult<(DevEui, DownlinkAck)> {
    Ok((
        DevEui::from_slice(&req.dev_eui)?,
        DownlinkAck {
            f_cnt: req.f_cnt,
            acknowledged: req.acknowledged,
        },
    ))
}

pub fn to_device_error(req: proto::HandleErrorRequest) -> DomainResult<(DevEui, DeviceError)> {
    let error_type = to_error_type(req.r#type());
    Ok((
        DevEui::from_slice(&req.dev_eui)?,
        DeviceError {
            error_type,
            error: req.error,
            f_cnt: req.f_cnt,
        },
    ))
}

pub fn to_device_status(req: proto::SetDeviceStatusRequest) -> DomainResult<(DevEui, DeviceStatus)> {
    Ok((
        DevEui::from_slice(&req.dev_eui)?,
        device_status(
            req.margin,
            req.external_power_source,
            req.battery_level_unavailable,
            req.battery_level,
        )?,
    ))
}

pub fn to_device_location(req: proto::SetDeviceLocationRequest) -> DomainResult<(DevEui, Location)> {
    let dev_eui = DevEui::from_slice(&req.dev_eui)?;
    let location = req.location.ok_or_else(|| missing("location"))?;
    Ok((dev_eui, to_location(location)))
}

pub fn to_gateway_stats(req: proto::HandleGatewayStatsRequest) -> DomainResult<GatewayStats> {
    Ok(GatewayStats {
        gateway_id: GatewayId::from_slice(&req.gateway_id)?,
        time: timestamp_to_datetime(req.time),
        location: req.location.map(to_location),
        rx_packets_received: req.rx_packets_received,
        rx_packets_received_ok: req.rx_packets_received_ok,
        tx_packets_received: req.tx_packets_received,
        tx_packets_emitted: req.tx_packets_emitted,
    })
}

pub fn to_tx_ack(req: proto::HandleTxAckRequest) -> DomainResult<(DevEui, TxAck)> {
    Ok((
        DevEui::from_slice(&req.dev_eui)?,
        TxAck {
            f_cnt: req.f_cnt,
            gateway_id: GatewayId::from_slice(&req.gateway_id)?,
            tx_info: to_tx_info(req.tx_info)?,
        },
    ))
}
