use crate::domain::{
    encode_payload, encrypt_frm_payload, Direction, Pipeline, PipelineContext,
    ResolveApplication, ResolveDevice, ResolveDeviceProfile, Services, Task, TaskOutcome,
};
use async_trait::async_trait;
use common::domain::{
    effective_codec, DeviceQueueItem, DomainError, DomainResult, DownlinkCommand, ErrorType,
    EventLogEntry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Downlink command on its way to the network server.
#[derive(Debug)]
pub struct Downlink {
    pub application_id: i64,
    pub command: DownlinkCommand,
    /// Plain FRMPayload, from the command data or the encoded object.
    pub payload: Option<Vec<u8>>,
}

impl Downlink {
    pub fn new(application_id: i64, command: DownlinkCommand) -> Self {
        Self {
            application_id,
            command,
            payload: None,
        }
    }
}

pub type DownlinkContext = PipelineContext<Downlink>;

pub fn downlink_pipeline() -> Pipeline<DownlinkContext> {
    Pipeline::new("downlink")
        .with_task(ValidateCommand)
        .with_task(ResolveDevice)
        .with_task(CheckOwnership)
        .with_task(ResolveApplication)
        .with_task(ResolveDeviceProfile)
        .with_task(EncodePayload)
        .with_task(EnqueueDownlink)
}

pub struct ValidateCommand;

#[async_trait]
impl Task<DownlinkContext> for ValidateCommand {
    fn name(&self) -> &'static str {
        "validate_command"
    }

    async fn run(
        &self,
        _services: &Services,
        ctx: &mut DownlinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        ctx.input.command.validate()?;
        Ok(TaskOutcome::Continue)
    }
}

/// Rejects commands published under an application the device does not belong to.
pub struct CheckOwnership;

#[async_trait]
impl Task<DownlinkContext> for CheckOwnership {
    fn name(&self) -> &'static str {
        "check_ownership"
    }

    async fn run(
        &self,
        _services: &Services,
        ctx: &mut DownlinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let owner = ctx.device()?.application_id;
        if owner != ctx.input.application_id {
            return Err(DomainError::ValidationError(format!(
                "device {} does not belong to application {}",
                ctx.dev_eui, ctx.input.application_id
            )));
        }
        Ok(TaskOutcome::Continue)
    }
}

/// Produces the plain payload. An object is encoded with the configured codec; without a
/// codec the command must carry raw data. Codec failures are reported as a
/// `DOWNLINK_CODEC` error event and drop the command.
pub struct EncodePayload;

#[async_trait]
impl Task<DownlinkContext> for EncodePayload {
    fn name(&self) -> &'static str {
        "encode_payload"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut DownlinkContext,
        cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let settings = effective_codec(ctx.application()?, ctx.device_profile.as_ref()).clone();

        let object = match &ctx.input.command.object {
            Some(object) if !settings.codec.is_none() => object.clone(),
            _ => {
                let data = ctx.input.command.data.clone().ok_or_else(|| {
                    DomainError::ValidationError(
                        "downlink carries neither data nor an object for a configured codec"
                            .to_string(),
                    )
                })?;
                ctx.input.payload = Some(data);
                return Ok(TaskOutcome::Continue);
            }
        };

        // fPort was range checked by ValidateCommand.
        let f_port = ctx.input.command.f_port as u8;
        let outcome = encode_payload(
            services.codecs.clone(),
            &settings,
            f_port,
            ctx.device()?.variables(),
            object,
            cancel,
        )
        .await?;

        match outcome {
            Ok(bytes) => {
                ctx.input.payload = Some(bytes);
                Ok(TaskOutcome::Continue)
            }
            Err(e) => {
                warn!(codec = %settings.codec, error = %e, "encoding downlink object failed");
                ctx.publish_codec_error(services, ErrorType::DownlinkCodec, e.to_string(), 0)
                    .await?;
                Ok(TaskOutcome::Abort)
            }
        }
    }
}

/// Encrypts the payload under the next downlink frame counter and queues it at the
/// network server.
pub struct EnqueueDownlink;

#[async_trait]
impl Task<DownlinkContext> for EnqueueDownlink {
    fn name(&self) -> &'static str {
        "enqueue_downlink"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut DownlinkContext,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let session = ctx.device()?.activation.ok_or_else(|| {
            DomainError::ValidationError(format!("device {} is not activated", ctx.dev_eui))
        })?;
        let payload = ctx.input.payload.clone().unwrap_or_default();
        let command = &ctx.input.command;

        let f_cnt = services
            .network_server
            .get_next_downlink_fcnt(&ctx.dev_eui)
            .await?;
        debug!(f_cnt, "next downlink frame counter");

        let frm_payload = encrypt_frm_payload(
            &session.app_s_key,
            &session.dev_addr,
            f_cnt,
            Direction::Downlink,
            &payload,
        );

        let logged = DownlinkCommand {
            data: Some(payload),
            ..command.clone()
        };
        match serde_json::to_value(&logged) {
            Ok(mut entry) => {
                entry["fCnt"] = f_cnt.into();
                if let Err(e) = services
                    .event_log
                    .append(&ctx.dev_eui, &EventLogEntry::downlink(entry))
                    .await
                {
                    warn!(error = %e, "appending downlink to device event log failed");
                }
            }
            Err(e) => warn!(error = %e, "serializing downlink for event log failed"),
        }

        services
            .network_server
            .create_device_queue_item(DeviceQueueItem {
                dev_eui: ctx.dev_eui,
                frm_payload,
                f_cnt,
                f_port: command.f_port,
                confirmed: command.confirmed,
            })
            .await?;

        info!(f_cnt, f_port = command.f_port, confirmed = command.confirmed, "downlink queued");
        Ok(TaskOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::*;
    use common::domain::{CodecSettings, IntegrationEvent};
    use common::{MockDeviceRepository, MockEventDispatcher, MockNetworkServerClient};
    use lorix_codec::CodecSelector;
    use mockall::Sequence;
    use serde_json::json;
    use std::sync::Arc;

    fn command(data: Option<Vec<u8>>, object: Option<serde_json::Value>) -> DownlinkCommand {
        DownlinkCommand {
            confirmed: true,
            f_port: 10,
            data,
            object,
        }
    }

    async fn run(services: &Services, application_id: i64, command: DownlinkCommand) -> DomainResult<()> {
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            Downlink::new(application_id, command),
        );
        downlink_pipeline()
            .run(services, &mut ctx, &CancellationToken::new())
            .await
    }

    fn script_codec(encoder: &str) -> CodecSettings {
        CodecSettings {
            codec: CodecSelector::CustomJs,
            decoder_script: None,
            encoder_script: Some(encoder.to_string()),
        }
    }

    #[tokio::test]
    async fn test_raw_data_is_encrypted_and_queued() {
        let (devices, applications, profiles) = resolving(
            device(Some(session())),
            application(CodecSettings::default()),
            device_profile(CodecSettings::default()),
        );
        let mut seq = Sequence::new();
        let mut network_server = MockNetworkServerClient::new();
        network_server
            .expect_get_next_downlink_fcnt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1));
        network_server
            .expect_create_device_queue_item()
            .withf(|item| {
                item.dev_eui == DEV_EUI
                    && item.f_cnt == 1
                    && item.f_port == 10
                    && item.confirmed
                    && hex::encode(&item.frm_payload) == "39cb02d29c7b841b6873483c1c3851b9bdd32fbf"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut event_log = common::MockEventLog::new();
        event_log
            .expect_append()
            .withf(|_, entry| {
                entry.event_type == "downlink" && entry.payload["fCnt"] == json!(1)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.device_profiles = Arc::new(profiles);
            s.network_server = Arc::new(network_server);
            s.event_log = Arc::new(event_log);
        });

        run(&services, 7, command(Some((0..20).collect()), None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_object_is_encoded_with_codec() {
        let (devices, applications, profiles) = resolving(
            device(Some(session())),
            application(script_codec(
                "function Encode(fPort, obj) { return [fPort, obj.level]; }",
            )),
            device_profile(CodecSettings::default()),
        );
        let mut network_server = MockNetworkServerClient::new();
        network_server
            .expect_get_next_downlink_fcnt()
            .returning(|_| Ok(5));
        network_server
            .expect_create_device_queue_item()
            .withf(|item| {
                encrypt_frm_payload(
                    &app_s_key(),
                    &DEV_ADDR,
                    5,
                    Direction::Downlink,
                    &item.frm_payload,
                ) == vec![10, 3]
            })
            .times(1)
            .returning(|_| Ok(()));

        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.device_profiles = Arc::new(profiles);
            s.network_server = Arc::new(network_server);
            s.event_log = Arc::new(event_log());
        });

        run(&services, 7, command(None, Some(json!({"level": 3}))))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_codec_failure_emits_error_and_drops_command() {
        let (devices, applications, profiles) = resolving(
            device(Some(session())),
            application(script_codec("function Encode() { return [256, 1]; }")),
            device_profile(CodecSettings::default()),
        );
        let mut dispatcher = MockEventDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|_, _, event| match event {
                IntegrationEvent::Error(e) => {
                    e.error_type == ErrorType::DownlinkCodec
                        && e.error == "value must be in byte range (0–255), got: 256"
                }
                _ => false,
            })
            .times(1)
            .return_const(());

        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.device_profiles = Arc::new(profiles);
            s.dispatcher = Arc::new(dispatcher);
            s.event_log = Arc::new(event_log());
        });

        run(&services, 7, command(None, Some(json!({}))))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_foreign_application_is_rejected() {
        let mut devices = MockDeviceRepository::new();
        devices
            .expect_get_device()
            .return_once(|_| Ok(Some(device(Some(session())))));
        let services = services_with(|s| s.devices = Arc::new(devices));

        let err = run(&services, 99, command(Some(vec![1]), None))
            .await
            .unwrap_err();

        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_out_of_range_f_port_is_rejected_first() {
        let services = services();
        let mut bad = command(Some(vec![1]), None);
        bad.f_port = 0;

        let err = run(&services, 7, bad).await.unwrap_err();

        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_object_without_codec_needs_data() {
        let (devices, applications, profiles) = resolving(
            device(Some(session())),
            application(CodecSettings::default()),
            device_profile(CodecSettings::default()),
        );
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.device_profiles = Arc::new(profiles);
        });

        let err = run(&services, 7, command(None, Some(json!({"led": true}))))
            .await
            .unwrap_err();

        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_network_server_failure_propagates() {
        let (devices, applications, profiles) = resolving(
            device(Some(session())),
            application(CodecSettings::default()),
            device_profile(CodecSettings::default()),
        );
        let mut network_server = MockNetworkServerClient::new();
        network_server
            .expect_get_next_downlink_fcnt()
            .returning(|_| Err(DomainError::NetworkServerError("unavailable".to_string())));
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.device_profiles = Arc::new(profiles);
            s.network_server = Arc::new(network_server);
        });

        let err = run(&services, 7, command(Some(vec![1]), None))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::NetworkServerError(_)));
    }
}
