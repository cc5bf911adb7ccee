use crate::domain::{
    ack_pipeline, downlink_pipeline, error_pipeline, location_pipeline, status_pipeline,
    tx_ack_pipeline, uplink_pipeline, DeviceError, Downlink, DownlinkAck, Pipeline,
    PipelineContext, Services, TxAck, Uplink, UplinkData,
};
use chrono::{DateTime, Utc};
use common::domain::{
    DevEui, DeviceStatus, DomainError, DomainResult, DownlinkRequest, EventContext, GatewayId,
    Location, Metrics,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Packet counters a gateway reports periodically.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStats {
    pub gateway_id: GatewayId,
    pub time: Option<DateTime<Utc>>,
    pub location: Option<Location>,
    pub rx_packets_received: u32,
    pub rx_packets_received_ok: u32,
    pub tx_packets_received: u32,
    pub tx_packets_emitted: u32,
}

/// Entry point for every event the network server pushes and every downlink command the
/// integrations receive. Each call runs the pipeline for its event type.
pub struct EventPipelineService {
    services: Services,
    uplink: Pipeline<PipelineContext<Uplink>>,
    ack: Pipeline<PipelineContext<DownlinkAck>>,
    error: Pipeline<PipelineContext<DeviceError>>,
    status: Pipeline<PipelineContext<DeviceStatus>>,
    location: Pipeline<PipelineContext<Location>>,
    tx_ack: Pipeline<PipelineContext<TxAck>>,
    downlink: Pipeline<PipelineContext<Downlink>>,
}

impl EventPipelineService {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            uplink: uplink_pipeline(),
            ack: ack_pipeline(),
            error: error_pipeline(),
            status: status_pipeline(),
            location: location_pipeline(),
            tx_ack: tx_ack_pipeline(),
            downlink: downlink_pipeline(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    #[instrument(skip(self, uplink, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui, f_cnt = uplink.f_cnt))]
    pub async fn handle_uplink(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        uplink: UplinkData,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, Uplink::new(uplink));
        self.uplink
            .run(&self.services, &mut pipeline_ctx, cancel)
            .await
    }

    #[instrument(skip(self, ack, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui, f_cnt = ack.f_cnt))]
    pub async fn handle_ack(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        ack: DownlinkAck,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, ack);
        self.ack.run(&self.services, &mut pipeline_ctx, cancel).await
    }

    #[instrument(skip(self, error, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui, error_type = error.error_type.as_str()))]
    pub async fn handle_error(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        error: DeviceError,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, error);
        self.error.run(&self.services, &mut pipeline_ctx, cancel).await
    }

    #[instrument(skip(self, status, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui))]
    pub async fn set_device_status(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        status: DeviceStatus,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, status);
        self.status
            .run(&self.services, &mut pipeline_ctx, cancel)
            .await
    }

    #[instrument(skip(self, location, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui))]
    pub async fn set_device_location(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        location: Location,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, location);
        self.location
            .run(&self.services, &mut pipeline_ctx, cancel)
            .await
    }

    #[instrument(skip(self, tx_ack, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %dev_eui, f_cnt = tx_ack.f_cnt))]
    pub async fn handle_tx_ack(
        &self,
        ctx: EventContext,
        dev_eui: DevEui,
        tx_ack: TxAck,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(ctx, dev_eui, tx_ack);
        self.tx_ack
            .run(&self.services, &mut pipeline_ctx, cancel)
            .await
    }

    /// Adds the reported packet counters to the gateway's time-bucketed metrics.
    #[instrument(skip(self, stats, cancel), fields(correlation_id = %ctx.correlation_id, gateway_id = %stats.gateway_id))]
    pub async fn handle_gateway_stats(
        &self,
        ctx: EventContext,
        stats: GatewayStats,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let mut metrics = Metrics::for_gateway(&stats.gateway_id, stats.time.unwrap_or_else(Utc::now));
        metrics
            .add("rx_count", f64::from(stats.rx_packets_received))
            .add("rx_ok_count", f64::from(stats.rx_packets_received_ok))
            .add("tx_count", f64::from(stats.tx_packets_received))
            .add("tx_ok_count", f64::from(stats.tx_packets_emitted));
        self.services.metrics.save_metrics(&metrics).await
    }

    /// Proprietary frames feed gateway ping resolution, which this tier does not run.
    #[instrument(skip(self, mac_payload), fields(correlation_id = %ctx.correlation_id, size = mac_payload.len()))]
    pub async fn handle_proprietary_uplink(
        &self,
        ctx: EventContext,
        mac_payload: &[u8],
    ) -> DomainResult<()> {
        debug!("proprietary uplink ignored");
        Ok(())
    }

    /// Runs a downlink command received from an integration.
    #[instrument(skip(self, request, cancel), fields(correlation_id = %ctx.correlation_id, dev_eui = %request.dev_eui, application_id = request.application_id, f_port = request.command.f_port))]
    pub async fn handle_downlink(
        &self,
        ctx: EventContext,
        request: DownlinkRequest,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let mut pipeline_ctx = PipelineContext::new(
            ctx,
            request.dev_eui,
            Downlink::new(request.application_id, request.command),
        );
        self.downlink
            .run(&self.services, &mut pipeline_ctx, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::*;
    use common::MockMetricsStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gateway_stats_counters() {
        let mut metrics = MockMetricsStore::new();
        metrics
            .expect_save_metrics()
            .withf(|m| {
                m.name == format!("gw:{}", GATEWAY_ID)
                    && m.timestamp == "2024-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
                    && m.values["rx_count"] == 10.0
                    && m.values["rx_ok_count"] == 8.0
                    && m.values["tx_count"] == 3.0
                    && m.values["tx_ok_count"] == 2.0
            })
            .times(1)
            .returning(|_| Ok(()));
        let service = EventPipelineService::new(services_with(|s| s.metrics = Arc::new(metrics)));

        service
            .handle_gateway_stats(
                EventContext::new(),
                GatewayStats {
                    gateway_id: GATEWAY_ID,
                    time: Some("2024-01-01T12:00:00Z".parse().unwrap()),
                    location: None,
                    rx_packets_received: 10,
                    rx_packets_received_ok: 8,
                    tx_packets_received: 3,
                    tx_packets_emitted: 2,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_touches_nothing() {
        let service = EventPipelineService::new(services());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .handle_ack(
                EventContext::new(),
                DEV_EUI,
                DownlinkAck {
                    f_cnt: 1,
                    acknowledged: false,
                },
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Cancelled));
    }

    #[tokio::test]
    async fn test_proprietary_uplink_is_accepted() {
        let service = EventPipelineService::new(services());
        service
            .handle_proprietary_uplink(EventContext::new(), &[0xe0, 0x01])
            .await
            .unwrap();
    }
}
