use crate::domain::{DevEui, DomainError, DomainResult, EventLog, EventLogEntry};
use crate::redis::RedisClient;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub fn event_log_key(dev_eui: &DevEui) -> String {
    format!("lorix:device:{}:events", dev_eui)
}

/// Capped per-device Redis stream tailed by UIs.
pub struct RedisEventLog {
    client: RedisClient,
    max_len: usize,
    ttl: Duration,
}

impl RedisEventLog {
    pub fn new(client: RedisClient, max_len: usize, ttl: Duration) -> Self {
        Self {
            client,
            max_len,
            ttl,
        }
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    #[instrument(skip(self, entry), fields(dev_eui = %dev_eui, event_type = %entry.event_type))]
    async fn append(&self, dev_eui: &DevEui, entry: &EventLogEntry) -> DomainResult<()> {
        let key = event_log_key(dev_eui);
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("type")
            .arg(&entry.event_type)
            .arg("payload")
            .arg(payload)
            .arg("published_at")
            .arg(entry.published_at.to_rfc3339())
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(self.ttl.as_millis() as u64)
            .ignore();

        let mut conn = self.client.connection();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(key = %key, "event appended");
        Ok(())
    }
}
