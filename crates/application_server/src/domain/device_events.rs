use crate::domain::{
    Pipeline, PipelineContext, ResolveApplication, ResolveDevice, Services, Task, TaskOutcome,
};
use async_trait::async_trait;
use common::domain::{
    AckEvent, BatteryState, DeviceStatus, DomainError, DomainResult, ErrorEvent, ErrorType,
    GatewayId, IntegrationEvent, Location, LocationEvent, StatusEvent, TxAckEvent, TxInfo,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkAck {
    pub f_cnt: u32,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub error_type: ErrorType,
    pub error: String,
    pub f_cnt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxAck {
    pub f_cnt: u32,
    pub gateway_id: GatewayId,
    pub tx_info: TxInfo,
}

/// Builds an integration event from the resolved context and the request.
pub trait IntoEvent: Sized + Send + Sync {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent>;
}

impl IntoEvent for DownlinkAck {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent> {
        let id = ctx.identity()?;
        Ok(IntegrationEvent::Ack(AckEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            acknowledged: self.acknowledged,
            f_cnt: self.f_cnt,
            tags: id.tags,
        }))
    }
}

impl IntoEvent for DeviceError {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent> {
        let id = ctx.identity()?;
        Ok(IntegrationEvent::Error(ErrorEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            error_type: self.error_type,
            error: self.error.clone(),
            f_cnt: self.f_cnt,
            tags: id.tags,
        }))
    }
}

impl IntoEvent for TxAck {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent> {
        let id = ctx.identity()?;
        Ok(IntegrationEvent::TxAck(TxAckEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            f_cnt: self.f_cnt,
            gateway_id: self.gateway_id,
            tx_info: self.tx_info.clone(),
            tags: id.tags,
        }))
    }
}

impl IntoEvent for DeviceStatus {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent> {
        let id = ctx.identity()?;
        let (external_power_source, battery_level_unavailable, battery_level) = match self.battery
        {
            BatteryState::ExternalPower => (true, false, 0.0),
            BatteryState::Unavailable => (false, true, 0.0),
            BatteryState::Level(level) => (false, false, level),
        };
        Ok(IntegrationEvent::Status(StatusEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            margin: self.margin,
            external_power_source,
            battery_level_unavailable,
            battery_level,
            tags: id.tags,
        }))
    }
}

impl IntoEvent for Location {
    fn to_event(&self, ctx: &PipelineContext<Self>) -> DomainResult<IntegrationEvent> {
        let id = ctx.identity()?;
        Ok(IntegrationEvent::Location(LocationEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            location: *self,
            tags: id.tags,
        }))
    }
}

/// Appends the event built from the request to the event log and fans it out.
pub struct PublishEvent;

#[async_trait]
impl<E: IntoEvent> Task<PipelineContext<E>> for PublishEvent {
    fn name(&self) -> &'static str {
        "publish_event"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<E>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let event = ctx.input.to_event(ctx)?;
        ctx.publish(services, event).await?;
        Ok(TaskOutcome::Continue)
    }
}

/// Persists the reported battery and margin.
pub struct StoreDeviceStatus;

#[async_trait]
impl Task<PipelineContext<DeviceStatus>> for StoreDeviceStatus {
    fn name(&self) -> &'static str {
        "store_device_status"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<DeviceStatus>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        services
            .devices
            .update_status(&ctx.dev_eui, &ctx.input)
            .await?;
        if let Some(device) = ctx.device.as_mut() {
            device.status = Some(ctx.input);
        }
        Ok(TaskOutcome::Continue)
    }
}

/// Persists the reported position.
pub struct StoreDeviceLocation;

#[async_trait]
impl Task<PipelineContext<Location>> for StoreDeviceLocation {
    fn name(&self) -> &'static str {
        "store_device_location"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<Location>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        services
            .devices
            .update_location(&ctx.dev_eui, &ctx.input)
            .await?;
        if let Some(device) = ctx.device.as_mut() {
            device.latitude = Some(ctx.input.latitude);
            device.longitude = Some(ctx.input.longitude);
            device.altitude = Some(ctx.input.altitude);
        }
        Ok(TaskOutcome::Continue)
    }
}

fn notify_pipeline<E: IntoEvent + 'static>(name: &'static str) -> Pipeline<PipelineContext<E>> {
    Pipeline::new(name)
        .with_task(ResolveDevice)
        .with_task(ResolveApplication)
        .with_task(PublishEvent)
}

pub fn ack_pipeline() -> Pipeline<PipelineContext<DownlinkAck>> {
    notify_pipeline("ack")
}

pub fn error_pipeline() -> Pipeline<PipelineContext<DeviceError>> {
    notify_pipeline("error")
}

pub fn tx_ack_pipeline() -> Pipeline<PipelineContext<TxAck>> {
    notify_pipeline("tx_ack")
}

pub fn status_pipeline() -> Pipeline<PipelineContext<DeviceStatus>> {
    Pipeline::new("status")
        .with_task(ResolveDevice)
        .with_task(ResolveApplication)
        .with_task(StoreDeviceStatus)
        .with_task(PublishEvent)
}

pub fn location_pipeline() -> Pipeline<PipelineContext<Location>> {
    Pipeline::new("location")
        .with_task(ResolveDevice)
        .with_task(ResolveApplication)
        .with_task(StoreDeviceLocation)
        .with_task(PublishEvent)
}

/// Builds the stored status from the flags the network server reports.
pub fn device_status(
    margin: i32,
    external_power_source: bool,
    battery_level_unavailable: bool,
    battery_level: f32,
) -> DomainResult<DeviceStatus> {
    let battery = if external_power_source {
        BatteryState::ExternalPower
    } else if battery_level_unavailable {
        BatteryState::Unavailable
    } else if (0.0..=100.0).contains(&battery_level) {
        BatteryState::Level(battery_level)
    } else {
        return Err(DomainError::ValidationError(format!(
            "battery level must be between 0 and 100, got {}",
            battery_level
        )));
    };
    Ok(DeviceStatus { margin, battery })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::*;
    use common::domain::{EventKind, LocationSource};
    use common::{MockApplicationRepository, MockDeviceRepository, MockEventDispatcher};
    use std::sync::Arc;

    fn resolving_device() -> (MockDeviceRepository, MockApplicationRepository) {
        let (devices, applications, _) = resolving(
            device(Some(session())),
            application(Default::default()),
            device_profile(Default::default()),
        );
        (devices, applications)
    }

    fn dispatcher_expecting(kind: EventKind) -> MockEventDispatcher {
        let mut dispatcher = MockEventDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(move |_, _, event| event.kind() == kind)
            .times(1)
            .return_const(());
        dispatcher
    }

    #[tokio::test]
    async fn test_unknown_device_ack_dispatches_nothing() {
        let mut devices = MockDeviceRepository::new();
        devices.expect_get_device().times(1).return_once(|_| Ok(None));
        let services = services_with(|s| s.devices = Arc::new(devices));
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            DownlinkAck {
                f_cnt: 3,
                acknowledged: true,
            },
        );

        let err = ack_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_ack_is_published() {
        let (devices, applications) = resolving_device();
        let mut dispatcher = MockEventDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|_, _, event| match event {
                IntegrationEvent::Ack(ack) => {
                    ack.acknowledged && ack.f_cnt == 3 && ack.application_name == "weather"
                }
                _ => false,
            })
            .times(1)
            .return_const(());
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.dispatcher = Arc::new(dispatcher);
            s.event_log = Arc::new(event_log());
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            DownlinkAck {
                f_cnt: 3,
                acknowledged: true,
            },
        );

        ack_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_and_tx_ack_are_published() {
        let (devices, applications) = resolving_device();
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.dispatcher = Arc::new(dispatcher_expecting(EventKind::Error));
            s.event_log = Arc::new(event_log());
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            DeviceError {
                error_type: ErrorType::DataUpFcnt,
                error: "frame-counter did not increment".to_string(),
                f_cnt: 9,
            },
        );
        error_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        let (devices, applications) = resolving_device();
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.dispatcher = Arc::new(dispatcher_expecting(EventKind::TxAck));
            s.event_log = Arc::new(event_log());
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            TxAck {
                f_cnt: 4,
                gateway_id: GATEWAY_ID,
                tx_info: tx_info(),
            },
        );
        tx_ack_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_is_stored_before_publish() {
        let (mut devices, applications) = resolving_device();
        devices
            .expect_update_status()
            .withf(|dev_eui, status| {
                *dev_eui == DEV_EUI
                    && status.margin == 10
                    && status.battery == BatteryState::Level(75.5)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut dispatcher = MockEventDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|_, _, event| match event {
                IntegrationEvent::Status(status) => {
                    status.margin == 10
                        && status.battery_level == 75.5
                        && !status.external_power_source
                        && !status.battery_level_unavailable
                }
                _ => false,
            })
            .times(1)
            .return_const(());
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.dispatcher = Arc::new(dispatcher);
            s.event_log = Arc::new(event_log());
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            device_status(10, false, false, 75.5).unwrap(),
        );

        status_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            ctx.device().unwrap().status.unwrap().battery,
            BatteryState::Level(75.5)
        );
    }

    #[tokio::test]
    async fn test_failed_location_write_publishes_nothing() {
        let (mut devices, applications) = resolving_device();
        devices.expect_update_location().times(1).returning(|_, _| {
            Err(DomainError::RepositoryError(anyhow::anyhow!("serialization failure")))
        });
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            Location {
                latitude: 52.3,
                longitude: 4.9,
                altitude: 12.0,
                source: LocationSource::Gps,
                accuracy: 0,
            },
        );

        let err = location_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::RepositoryError(_)));
    }

    #[tokio::test]
    async fn test_location_is_stored_and_published() {
        let (mut devices, applications) = resolving_device();
        devices
            .expect_update_location()
            .withf(|_, location| location.source == LocationSource::GeoResolverTdoa)
            .times(1)
            .returning(|_, _| Ok(()));
        let services = services_with(|s| {
            s.devices = Arc::new(devices);
            s.applications = Arc::new(applications);
            s.dispatcher = Arc::new(dispatcher_expecting(EventKind::Location));
            s.event_log = Arc::new(event_log());
        });
        let mut ctx = PipelineContext::new(
            Default::default(),
            DEV_EUI,
            Location {
                latitude: 52.3,
                longitude: 4.9,
                altitude: 12.0,
                source: LocationSource::GeoResolverTdoa,
                accuracy: 25,
            },
        );

        location_pipeline()
            .run(&services, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ctx.device().unwrap().latitude, Some(52.3));
    }

    #[test]
    fn test_device_status_flags() {
        assert_eq!(
            device_status(1, true, true, 50.0).unwrap().battery,
            BatteryState::ExternalPower
        );
        assert_eq!(
            device_status(1, false, true, 50.0).unwrap().battery,
            BatteryState::Unavailable
        );
        assert!(device_status(1, false, false, 100.5).unwrap_err().is_validation());
    }
}
