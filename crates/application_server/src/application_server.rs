use crate::domain::EventPipelineService;
use crate::grpc::build_application_server_routes;
use common::grpc::{run_grpc_server, GrpcServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The ingress gRPC service the network server pushes events to.
pub struct ApplicationServer {
    service: Arc<EventPipelineService>,
    config: GrpcServerConfig,
}

impl ApplicationServer {
    pub fn new(service: Arc<EventPipelineService>, config: GrpcServerConfig) -> Self {
        debug!("Initializing application server module");
        Self { service, config }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| {
            Box::pin(async move {
                let routes = build_application_server_routes(self.service);
                run_grpc_server(self.config, routes, ctx).await
            })
        }
    }
}
