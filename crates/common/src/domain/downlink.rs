use crate::domain::{base64_bytes, DevEui, DomainError, DomainResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MIN_F_PORT: u32 = 1;
pub const MAX_F_PORT: u32 = 224;

/// Downlink command body as published on the MQTT downlink topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlinkCommand {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(rename = "fPort")]
    pub f_port: u32,
    #[serde(
        default,
        with = "base64_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

impl DownlinkCommand {
    pub fn validate(&self) -> DomainResult<()> {
        if !(MIN_F_PORT..=MAX_F_PORT).contains(&self.f_port) {
            return Err(DomainError::ValidationError(format!(
                "fPort must be between {} and {}, got {}",
                MIN_F_PORT, MAX_F_PORT, self.f_port
            )));
        }
        Ok(())
    }
}

/// A downlink command addressed to one device, as extracted from the topic.
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkRequest {
    pub application_id: i64,
    pub dev_eui: DevEui,
    pub command: DownlinkCommand,
}

pub fn downlink_lock_key(application_id: i64, dev_eui: &DevEui) -> String {
    format!("downlink:lock:{}:{}", application_id, dev_eui)
}

/// Cluster-wide "first subscriber wins" lock for inbound downlink commands.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DownlinkLock: Send + Sync {
    /// Returns `true` when this instance acquired the lock.
    async fn try_acquire(&self, application_id: i64, dev_eui: &DevEui) -> DomainResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_parses_data_and_object() {
        let command: DownlinkCommand =
            serde_json::from_value(json!({"confirmed": true, "fPort": 10, "data": "AQID"})).unwrap();
        assert!(command.confirmed);
        assert_eq!(command.data, Some(vec![1, 2, 3]));
        assert_eq!(command.object, None);

        let command: DownlinkCommand =
            serde_json::from_value(json!({"fPort": 2, "object": {"led": true}})).unwrap();
        assert!(!command.confirmed);
        assert_eq!(command.data, None);
        assert_eq!(command.object, Some(json!({"led": true})));
    }

    #[test]
    fn test_f_port_bounds() {
        let command = |f_port| DownlinkCommand {
            confirmed: false,
            f_port,
            data: None,
            object: None,
        };
        assert!(command(0).validate().is_err());
        assert!(command(1).validate().is_ok());
        assert!(command(224).validate().is_ok());
        assert!(command(225).validate().is_err());
    }

    #[test]
    fn test_lock_key() {
        let dev_eui = DevEui::new([0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(downlink_lock_key(12, &dev_eui), "downlink:lock:12:0001020304050607");
    }
}
