use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::domain::EventPipelineService;
use crate::grpc::conversions::{
    to_device_error, to_device_location, to_device_status, to_downlink_ack, to_gateway_stats,
    to_tx_ack, to_uplink,
};
use common::domain::EventContext;
use common::grpc::domain_error_to_status;
use lorix_proto::v1::application_server_service_server::ApplicationServerService as ApplicationServerServiceTrait;
use lorix_proto::v1::{
    HandleDownlinkAckRequest, HandleErrorRequest, HandleGatewayStatsRequest,
    HandleProprietaryUplinkRequest, HandleTxAckRequest, HandleUplinkDataRequest,
    SetDeviceLocationRequest, SetDeviceStatusRequest,
};

/// gRPC handler for ApplicationServerService.
/// Maps proto requests onto the event pipelines and domain errors onto status codes.
///
/// Each call gets a fresh correlation id and a cancellation token that fires when tonic
/// drops the handler future, so a caller hanging up stops the pipeline between tasks.
pub struct ApplicationServerHandler {
    service: Arc<EventPipelineService>,
}

impl ApplicationServerHandler {
    pub fn new(service: Arc<EventPipelineService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl ApplicationServerServiceTrait for ApplicationServerHandler {
    #[instrument(
        name = "HandleUplinkData",
        skip(self, request),
        fields(
            dev_eui = %hex::encode(&request.get_ref().dev_eui),
            f_cnt = request.get_ref().f_cnt,
            f_port = request.get_ref().f_port,
        )
    )]
    async fn handle_uplink_data(
        &self,
        request: Request<HandleUplinkDataRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, uplink) =
            to_uplink(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .handle_uplink(EventContext::new(), dev_eui, uplink, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "HandleDownlinkACK",
        skip(self, request),
        fields(
            dev_eui = %hex::encode(&request.get_ref().dev_eui),
            f_cnt = request.get_ref().f_cnt,
        )
    )]
    async fn handle_downlink_ack(
        &self,
        request: Request<HandleDownlinkAckRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, ack) =
            to_downlink_ack(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .handle_ack(EventContext::new(), dev_eui, ack, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "HandleError",
        skip(self, request),
        fields(dev_eui = %hex::encode(&request.get_ref().dev_eui))
    )]
    async fn handle_error(
        &self,
        request: Request<HandleErrorRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, error) =
            to_device_error(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .handle_error(EventContext::new(), dev_eui, error, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "HandleProprietaryUplink",
        skip(self, request),
        fields(size = request.get_ref().mac_payload.len())
    )]
    async fn handle_proprietary_uplink(
        &self,
        request: Request<HandleProprietaryUplinkRequest>,
    ) -> Result<Response<()>, Status> {
        let req = request.into_inner();

        self.service
            .handle_proprietary_uplink(EventContext::new(), &req.mac_payload)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "SetDeviceStatus",
        skip(self, request),
        fields(dev_eui = %hex::encode(&request.get_ref().dev_eui))
    )]
    async fn set_device_status(
        &self,
        request: Request<SetDeviceStatusRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, status) =
            to_device_status(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .set_device_status(EventContext::new(), dev_eui, status, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "SetDeviceLocation",
        skip(self, request),
        fields(dev_eui = %hex::encode(&request.get_ref().dev_eui))
    )]
    async fn set_device_location(
        &self,
        request: Request<SetDeviceLocationRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, location) =
            to_device_location(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .set_device_location(EventContext::new(), dev_eui, location, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "HandleGatewayStats",
        skip(self, request),
        fields(gateway_id = %hex::encode(&request.get_ref().gateway_id))
    )]
    async fn handle_gateway_stats(
        &self,
        request: Request<HandleGatewayStatsRequest>,
    ) -> Result<Response<()>, Status> {
        let stats = to_gateway_stats(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .handle_gateway_stats(EventContext::new(), stats, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    #[instrument(
        name = "HandleTxAck",
        skip(self, request),
        fields(
            dev_eui = %hex::encode(&request.get_ref().dev_eui),
            f_cnt = request.get_ref().f_cnt,
        )
    )]
    async fn handle_tx_ack(
        &self,
        request: Request<HandleTxAckRequest>,
    ) -> Result<Response<()>, Status> {
        let (dev_eui, tx_ack) = to_tx_ack(request.into_inner()).map_err(domain_error_to_status)?;
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();

        self.service
            .handle_tx_ack(EventContext::new(), dev_eui, tx_ack, &token)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }
}
