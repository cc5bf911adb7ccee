pub mod application_server;
pub mod domain;
pub mod downlink;
pub mod grpc;

pub use application_server::*;
pub use domain::*;
pub use downlink::*;
pub use grpc::*;
