mod conversions;
mod handler;
mod network_server_client;

pub use conversions::*;
pub use handler::*;
pub use network_server_client::*;

use crate::domain::EventPipelineService;
use lorix_proto::v1::application_server_service_server::ApplicationServerServiceServer;
use std::sync::Arc;
use tonic::service::Routes;

/// Routes serving the ingress service the network server calls.
pub fn build_application_server_routes(service: Arc<EventPipelineService>) -> Routes {
    Routes::new(ApplicationServerServiceServer::new(
        ApplicationServerHandler::new(service),
    ))
}
