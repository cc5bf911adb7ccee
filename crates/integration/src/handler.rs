use crate::Result;
use async_trait::async_trait;
use common::domain::{
    AckEvent, DownlinkRequest, ErrorEvent, IntegrationEvent, JoinEvent, LocationEvent,
    StatusEvent, TxAckEvent, UplinkEvent,
};
use lorix_codec::Variables;
use tokio::sync::mpsc;

/// A back-end sink for application events.
///
/// Handlers are shared between concurrent deliveries and must bound their own I/O.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    /// Short identifier used in logs, e.g. `http` or `mqtt`.
    fn name(&self) -> &'static str;

    async fn handle_uplink_event(&self, vars: &Variables, event: &UplinkEvent) -> Result<()>;

    async fn handle_join_event(&self, vars: &Variables, event: &JoinEvent) -> Result<()>;

    async fn handle_ack_event(&self, vars: &Variables, event: &AckEvent) -> Result<()>;

    async fn handle_error_event(&self, vars: &Variables, event: &ErrorEvent) -> Result<()>;

    async fn handle_status_event(&self, vars: &Variables, event: &StatusEvent) -> Result<()>;

    async fn handle_location_event(&self, vars: &Variables, event: &LocationEvent) -> Result<()>;

    async fn handle_tx_ack_event(&self, vars: &Variables, event: &TxAckEvent) -> Result<()>;

    /// Hands out the inbound downlink channel, once. Only handlers that subscribe to
    /// downlink commands return one.
    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>>;

    async fn close(&self) -> Result<()>;
}

/// Routes an event to the matching handler operation.
pub async fn deliver(
    handler: &dyn IntegrationHandler,
    vars: &Variables,
    event: &IntegrationEvent,
) -> Result<()> {
    match event {
        IntegrationEvent::Uplink(e) => handler.handle_uplink_event(vars, e).await,
        IntegrationEvent::Join(e) => handler.handle_join_event(vars, e).await,
        IntegrationEvent::Ack(e) => handler.handle_ack_event(vars, e).await,
        IntegrationEvent::Error(e) => handler.handle_error_event(vars, e).await,
        IntegrationEvent::Status(e) => handler.handle_status_event(vars, e).await,
        IntegrationEvent::Location(e) => handler.handle_location_event(vars, e).await,
        IntegrationEvent::TxAck(e) => handler.handle_tx_ack_event(vars, e).await,
    }
}
