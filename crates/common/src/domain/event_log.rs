use crate::domain::{DevEui, DomainResult, EventKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One entry of the transient per-device event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Entry for a downlink command forwarded to the network server.
    pub fn downlink(payload: serde_json::Value) -> Self {
        Self {
            event_type: "downlink".to_string(),
            payload,
            published_at: Utc::now(),
        }
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, dev_eui: &DevEui, entry: &EventLogEntry) -> DomainResult<()>;
}
