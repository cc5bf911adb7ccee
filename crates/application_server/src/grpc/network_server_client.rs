use async_trait::async_trait;
use common::domain::{DevEui, DeviceQueueItem, DomainError, DomainResult, NetworkServerClient};
use lorix_proto::v1 as proto;
use lorix_proto::v1::network_server_service_client::NetworkServerServiceClient;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, instrument};

/// Network-server client over a lazily connected channel.
///
/// The channel reconnects on demand, so the application server starts even while the
/// network server is still coming up.
#[derive(Clone)]
pub struct GrpcNetworkServerClient {
    client: NetworkServerServiceClient<Channel>,
}

impl GrpcNetworkServerClient {
    pub fn connect_lazy(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        debug!(endpoint = %endpoint, "network-server channel configured");
        Ok(Self {
            client: NetworkServerServiceClient::new(channel),
        })
    }
}

fn status_to_domain(status: Status) -> DomainError {
    DomainError::NetworkServerError(format!("{:?}: {}", status.code(), status.message()))
}

#[async_trait]
impl NetworkServerClient for GrpcNetworkServerClient {
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn get_next_downlink_fcnt(&self, dev_eui: &DevEui) -> DomainResult<u32> {
        let response = self
            .client
            .clone()
            .get_next_downlink_f_cnt(proto::GetNextDownlinkFCntRequest {
                dev_eui: dev_eui.as_bytes().to_vec(),
            })
            .await
            .map_err(status_to_domain)?;
        Ok(response.into_inner().f_cnt)
    }

    #[instrument(skip(self, item), fields(dev_eui = %item.dev_eui, f_cnt = item.f_cnt))]
    async fn create_device_queue_item(&self, item: DeviceQueueItem) -> DomainResult<()> {
        self.client
            .clone()
            .create_device_queue_item(proto::CreateDeviceQueueItemRequest {
                item: Some(proto::DeviceQueueItem {
                    dev_eui: item.dev_eui.as_bytes().to_vec(),
                    frm_payload: item.frm_payload,
                    f_cnt: item.f_cnt,
                    f_port: item.f_port,
                    confirmed: item.confirmed,
                }),
            })
            .await
            .map_err(status_to_domain)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_network_server_error() {
        let err = status_to_domain(Status::not_found("device queue"));
        assert!(matches!(err, DomainError::NetworkServerError(ref msg) if msg.contains("device queue")));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_rejected() {
        assert!(GrpcNetworkServerClient::connect_lazy("not a uri", Duration::from_secs(1)).is_err());
    }
}
