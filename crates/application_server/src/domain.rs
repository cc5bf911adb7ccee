mod codec;
mod context;
mod crypto;
mod device_events;
mod downlink;
mod keys;
mod pipeline;
mod service;
mod tasks;
mod uplink;

pub use codec::*;
pub use context::*;
pub use crypto::*;
pub use device_events::*;
pub use downlink::*;
pub use keys::*;
pub use pipeline::*;
pub use service::*;
pub use tasks::*;
pub use uplink::*;

#[cfg(test)]
pub(crate) mod test_support;
