use crate::domain::{
    decode_payload, encrypt_frm_payload, Direction, KeyEnvelope, Pipeline, PipelineContext,
    ResolveApplication, ResolveDevice, ResolveDeviceProfile, Services, Task, TaskOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{
    effective_codec, DevAddr, DeviceActivation, DomainError, DomainResult, ErrorType,
    IntegrationEvent, JoinEvent, Metrics, RxInfo, TxInfo, UplinkDeviceUpdate, UplinkEvent,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Session handed over by the network server after a (re-)join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationContext {
    pub dev_addr: DevAddr,
    pub app_s_key: KeyEnvelope,
}

/// Uplink frame as received from the network server. `data` is still encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkData {
    pub f_cnt: u32,
    pub f_port: u8,
    pub dr: u8,
    pub adr: bool,
    pub data: Vec<u8>,
    pub rx_info: Vec<RxInfo>,
    pub tx_info: TxInfo,
    pub activation: Option<ActivationContext>,
}

/// Uplink being processed: the request plus what the tasks derived from it.
#[derive(Debug)]
pub struct Uplink {
    pub request: UplinkData,
    /// Unwrapped session from the activation context, if one was sent.
    pub session: Option<DeviceActivation>,
    pub payload: Vec<u8>,
    pub object: Option<Value>,
}

impl Uplink {
    pub fn new(request: UplinkData) -> Self {
        Self {
            request,
            session: None,
            payload: Vec::new(),
            object: None,
        }
    }
}

pub type UplinkContext = PipelineContext<Uplink>;

pub fn uplink_pipeline() -> Pipeline<UplinkContext> {
    Pipeline::new("uplink")
        .with_task(ResolveDevice)
        .with_task(ResolveApplication)
        .with_task(ResolveDeviceProfile)
        .with_task(UnwrapSessionKey)
        .with_task(RecordUplink)
        .with_task(DecryptPayload)
        .with_task(DecodePayload)
        .with_task(PublishUplink)
        .with_task(RecordDeviceMetrics)
}

/// Resolves the AppSKey of a new session.
pub struct UnwrapSessionKey;

#[async_trait]
impl Task<UplinkContext> for UnwrapSessionKey {
    fn name(&self) -> &'static str {
        "unwrap_session_key"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut UplinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let Some(activation) = &ctx.input.request.activation else {
            return Ok(TaskOutcome::Continue);
        };

        if activation.dev_addr.is_zero() {
            return Err(DomainError::ValidationError(
                "activation context carries no DevAddr".to_string(),
            ));
        }

        let app_s_key = services.keys.unwrap_key(&activation.app_s_key)?;
        ctx.input.session = Some(DeviceActivation {
            dev_addr: activation.dev_addr,
            app_s_key,
        });
        Ok(TaskOutcome::Continue)
    }
}

/// Persists last-seen, data rate and a changed session in one transaction, and reports a
/// rotated session as a join.
pub struct RecordUplink;

#[async_trait]
impl Task<UplinkContext> for RecordUplink {
    fn name(&self) -> &'static str {
        "record_uplink"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut UplinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let update = UplinkDeviceUpdate {
            last_seen_at: Utc::now(),
            dr: ctx.input.request.dr,
            activation: ctx.input.session,
        };
        let rotated = services.devices.record_uplink(&ctx.dev_eui, &update).await?;

        let device = ctx
            .device
            .as_mut()
            .ok_or_else(|| DomainError::DeviceNotFound(ctx.dev_eui.to_string()))?;
        device.last_seen_at = Some(update.last_seen_at);
        device.dr = Some(update.dr);

        let Some(session) = update.activation.filter(|_| rotated) else {
            return Ok(TaskOutcome::Continue);
        };
        device.activation = Some(session);
        info!(dev_addr = %session.dev_addr, "device session rotated");

        let id = ctx.identity()?;
        let join = JoinEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            dev_addr: session.dev_addr,
            rx_info: ctx.input.request.rx_info.clone(),
            tx_info: ctx.input.request.tx_info.clone(),
            dr: ctx.input.request.dr,
            tags: id.tags,
        };
        ctx.publish(services, IntegrationEvent::Join(join)).await?;
        Ok(TaskOutcome::Continue)
    }
}

/// Decrypts the FRMPayload with the device's current AppSKey.
pub struct DecryptPayload;

#[async_trait]
impl Task<UplinkContext> for DecryptPayload {
    fn name(&self) -> &'static str {
        "decrypt_payload"
    }

    async fn run(
        &self,
        _services: &Services,
        ctx: &mut UplinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let request = &ctx.input.request;
        if request.data.is_empty() {
            return Ok(TaskOutcome::Continue);
        }

        let session = ctx.device()?.activation.ok_or_else(|| {
            DomainError::DecryptionError("device has no active session".to_string())
        })?;
        ctx.input.payload = encrypt_frm_payload(
            &session.app_s_key,
            &session.dev_addr,
            request.f_cnt,
            Direction::Uplink,
            &request.data,
        );
        Ok(TaskOutcome::Continue)
    }
}

/// Runs the configured codec. A codec failure is reported as an `UPLINK_CODEC` error event
/// and the uplink continues without an object.
pub struct DecodePayload;

#[async_trait]
impl Task<UplinkContext> for DecodePayload {
    fn name(&self) -> &'static str {
        "decode_payload"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut UplinkContext,
        cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let settings = effective_codec(ctx.application()?, ctx.device_profile.as_ref()).clone();
        if settings.codec.is_none() {
            return Ok(TaskOutcome::Continue);
        }

        let outcome = decode_payload(
            services.codecs.clone(),
            &settings,
            ctx.input.request.f_port,
            ctx.device()?.variables(),
            ctx.input.payload.clone(),
            cancel,
        )
        .await?;

        match outcome {
            Ok(object) => ctx.input.object = object,
            Err(e) => {
                warn!(codec = %settings.codec, error = %e, "decoding uplink payload failed");
                ctx.publish_codec_error(
                    services,
                    ErrorType::UplinkCodec,
                    e.to_string(),
                    ctx.input.request.f_cnt,
                )
                .await?;
            }
        }
        Ok(TaskOutcome::Continue)
    }
}

/// Fans the uplink out to the integrations.
pub struct PublishUplink;

#[async_trait]
impl Task<UplinkContext> for PublishUplink {
    fn name(&self) -> &'static str {
        "publish_uplink"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut UplinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let id = ctx.identity()?;
        let request = &ctx.input.request;
        let event = UplinkEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            dev_addr: ctx.device()?.activation.map(|a| a.dev_addr),
            rx_info: request.rx_info.clone(),
            tx_info: request.tx_info.clone(),
            adr: request.adr,
            dr: request.dr,
            f_cnt: request.f_cnt,
            f_port: request.f_port,
            data: ctx.input.payload.clone(),
            object: ctx.input.object.take(),
            tags: id.tags,
        };
        ctx.publish(services, IntegrationEvent::Uplink(event)).await?;
        Ok(TaskOutcome::Continue)
    }
}

/// Adds the uplink to the device's time-bucketed counters.
///
/// The uplink has already been delivered at this point, so a store failure is logged
/// rather than failing the request.
pub struct RecordDeviceMetrics;

#[async_trait]
impl Task<UplinkContext> for RecordDeviceMetrics {
    fn name(&self) -> &'static str {
        "record_device_metrics"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut UplinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let request = &ctx.input.request;
        let mut metrics = Metrics::for_device(&ctx.dev_eui, Utc::now());
        metrics
            .add("rx_count", 1.0)
            .add(
                "gw_rssi_sum",
                request.rx_info.iter().map(|rx| f64::from(rx.rssi)).sum(),
            )
            .add(
                "gw_snr_sum",
                request.rx_info.iter().map(|rx| rx.lora_snr).sum(),
            )
            .add(format!("rx_dr_{}", request.dr), 1.0);

        if let Err(e) = services.metrics.save_metrics(&metrics).await {
            error!(error = %e, "saving device metrics failed");
        }
        Ok(TaskOutcome::Continue)
    }
}
