//! Generated gRPC types for the network-server boundary.

pub mod v1 {
    tonic::include_proto!("lorix.v1");
}

pub use v1::*;
