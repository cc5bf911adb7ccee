use crate::domain::KekStore;
use anyhow::anyhow;
use common::domain::{
    Application, ApplicationRepository, DevEui, Device, DeviceProfile, DeviceProfileRepository,
    DeviceRepository, DomainError, DomainResult, ErrorEvent, ErrorType, EventContext,
    EventDispatcher, EventLog, EventLogEntry, IntegrationEvent, MetricsStore, NetworkServerClient,
    Tags,
};
use lorix_codec::CodecRegistry;
use std::sync::Arc;
use tracing::warn;

/// Collaborators shared by every pipeline.
#[derive(Clone)]
pub struct Services {
    pub devices: Arc<dyn DeviceRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub device_profiles: Arc<dyn DeviceProfileRepository>,
    pub dispatcher: Arc<dyn EventDispatcher>,
    pub metrics: Arc<dyn MetricsStore>,
    pub event_log: Arc<dyn EventLog>,
    pub codecs: Arc<CodecRegistry>,
    pub keys: Arc<KekStore>,
    pub network_server: Arc<dyn NetworkServerClient>,
}

impl Services {
    /// Appends the event to the device event log, then hands it to the dispatcher.
    ///
    /// The event log is a best-effort tail for consoles; failing to append does not hold
    /// back delivery.
    pub async fn publish(&self, ctx: &EventContext, device: &Device, event: IntegrationEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => {
                let entry = EventLogEntry::new(event.kind(), payload);
                if let Err(e) = self.event_log.append(&device.dev_eui, &entry).await {
                    warn!(event = %event.kind(), error = %e, "appending to device event log failed");
                }
            }
            Err(e) => warn!(event = %event.kind(), error = %e, "serializing event for event log failed"),
        }

        self.dispatcher.dispatch(ctx, &device.variables(), event);
    }
}

/// State carried through one pipeline run.
///
/// The resolver tasks fill in `device`, `application` and `device_profile`; later tasks
/// read them through the accessors.
#[derive(Debug)]
pub struct PipelineContext<E> {
    pub event_ctx: EventContext,
    pub dev_eui: DevEui,
    pub device: Option<Device>,
    pub application: Option<Application>,
    pub device_profile: Option<DeviceProfile>,
    pub input: E,
}

impl<E> PipelineContext<E> {
    pub fn new(event_ctx: EventContext, dev_eui: DevEui, input: E) -> Self {
        Self {
            event_ctx,
            dev_eui,
            device: None,
            application: None,
            device_profile: None,
            input,
        }
    }

    pub fn device(&self) -> DomainResult<&Device> {
        self.device.as_ref().ok_or_else(|| unresolved("device"))
    }

    pub fn application(&self) -> DomainResult<&Application> {
        self.application.as_ref().ok_or_else(|| unresolved("application"))
    }

    /// Identity fields every event carries.
    pub fn identity(&self) -> DomainResult<EventIdentity> {
        let device = self.device()?;
        let application = self.application()?;
        Ok(EventIdentity {
            application_id: application.id,
            application_name: application.name.clone(),
            device_name: device.name.clone(),
            dev_eui: device.dev_eui,
            tags: device.tags.clone(),
        })
    }

    /// Publishes an event about the resolved device.
    pub async fn publish(&self, services: &Services, event: IntegrationEvent) -> DomainResult<()>
    where
        E: Sync,
    {
        services.publish(&self.event_ctx, self.device()?, event).await;
        Ok(())
    }

    /// Reports a codec failure as an error event.
    pub async fn publish_codec_error(
        &self,
        services: &Services,
        error_type: ErrorType,
        error: String,
        f_cnt: u32,
    ) -> DomainResult<()>
    where
        E: Sync,
    {
        let id = self.identity()?;
        let event = ErrorEvent {
            application_id: id.application_id,
            application_name: id.application_name,
            device_name: id.device_name,
            dev_eui: id.dev_eui,
            error_type,
            error,
            f_cnt,
            tags: id.tags,
        };
        self.publish(services, IntegrationEvent::Error(event)).await
    }
}

/// Application and device identity copied into every event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventIdentity {
    pub application_id: i64,
    pub application_name: String,
    pub device_name: String,
    pub dev_eui: DevEui,
    pub tags: Tags,
}

fn unresolved(what: &str) -> DomainError {
    DomainError::RepositoryError(anyhow!("{} used before it was resolved", what))
}
