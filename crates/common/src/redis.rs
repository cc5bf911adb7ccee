mod client;
mod config;
mod downlink_lock;
mod event_log;
mod metrics_store;

pub use client::*;
pub use config::*;
pub use downlink_lock::*;
pub use event_log::*;
pub use metrics_store::*;
