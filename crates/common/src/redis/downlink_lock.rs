use crate::domain::{downlink_lock_key, DevEui, DomainError, DomainResult, DownlinkLock};
use crate::redis::RedisClient;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// `SET key 1 PX ttl NX`: the first instance to write the key owns the command.
pub struct RedisDownlinkLock {
    client: RedisClient,
    ttl: Duration,
}

impl RedisDownlinkLock {
    pub fn new(client: RedisClient, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

#[async_trait]
impl DownlinkLock for RedisDownlinkLock {
    #[instrument(skip(self), fields(application_id = %application_id, dev_eui = %dev_eui))]
    async fn try_acquire(&self, application_id: i64, dev_eui: &DevEui) -> DomainResult<bool> {
        let key = downlink_lock_key(application_id, dev_eui);
        let mut conn = self.client.connection();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let acquired = reply.is_some();
        debug!(key = %key, acquired, "downlink lock attempt");
        Ok(acquired)
    }
}
