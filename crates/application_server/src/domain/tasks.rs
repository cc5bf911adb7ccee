use crate::domain::{PipelineContext, Services, Task, TaskOutcome};
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Loads the device addressed by the event.
pub struct ResolveDevice;

#[async_trait]
impl<E: Send + Sync> Task<PipelineContext<E>> for ResolveDevice {
    fn name(&self) -> &'static str {
        "resolve_device"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<E>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let device = services
            .devices
            .get_device(&ctx.dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(ctx.dev_eui.to_string()))?;

        debug!(application_id = device.application_id, "device resolved");
        ctx.device = Some(device);
        Ok(TaskOutcome::Continue)
    }
}

/// Loads the application owning the resolved device.
pub struct ResolveApplication;

#[async_trait]
impl<E: Send + Sync> Task<PipelineContext<E>> for ResolveApplication {
    fn name(&self) -> &'static str {
        "resolve_application"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<E>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let application_id = ctx.device()?.application_id;
        let application = services
            .applications
            .get_application(application_id)
            .await?
            .ok_or(DomainError::ApplicationNotFound(application_id))?;

        ctx.application = Some(application);
        Ok(TaskOutcome::Continue)
    }
}

/// Loads the device profile of the resolved device.
pub struct ResolveDeviceProfile;

#[async_trait]
impl<E: Send + Sync> Task<PipelineContext<E>> for ResolveDeviceProfile {
    fn name(&self) -> &'static str {
        "resolve_device_profile"
    }

    async fn run(
        &self,
        services: &Services,
        ctx: &mut PipelineContext<E>,
        _cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let profile_id = ctx.device()?.device_profile_id;
        let profile = services
            .device_profiles
            .get_device_profile(&profile_id)
            .await?
            .ok_or_else(|| DomainError::DeviceProfileNotFound(profile_id.to_string()))?;

        ctx.device_profile = Some(profile);
        Ok(TaskOutcome::Continue)
    }
}
