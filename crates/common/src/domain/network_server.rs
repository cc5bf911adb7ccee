use crate::domain::{DevEui, DomainResult};
use async_trait::async_trait;

/// Encrypted downlink payload ready to be queued at the network server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceQueueItem {
    pub dev_eui: DevEui,
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
    pub f_port: u32,
    pub confirmed: bool,
}

/// Calls this tier issues against the network server.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkServerClient: Send + Sync {
    async fn get_next_downlink_fcnt(&self, dev_eui: &DevEui) -> DomainResult<u32>;

    async fn create_device_queue_item(&self, item: DeviceQueueItem) -> DomainResult<()>;
}
