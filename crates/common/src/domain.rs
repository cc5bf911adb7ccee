mod application;
mod device;
mod dispatcher;
mod downlink;
mod event;
mod event_log;
mod integration;
mod metrics;
mod network_server;
mod result;
mod types;

pub use application::*;
pub use device::*;
pub use dispatcher::*;
pub use downlink::*;
pub use event::*;
pub use event_log::*;
pub use integration::*;
pub use metrics::*;
pub use network_server::*;
pub use result::*;
pub use types::*;
