use crate::domain::{Aggregation, DomainError, DomainResult, Metrics, MetricsStore};
use crate::redis::RedisClient;
use async_trait::async_trait;
use tracing::{debug, instrument};

const KEY_PREFIX: &str = "lorix:metrics";

pub fn metrics_key(name: &str, aggregation: Aggregation, metrics: &Metrics) -> String {
    format!(
        "{}:{}:{}:{}",
        KEY_PREFIX,
        name,
        aggregation.as_str(),
        aggregation.bucket_start(metrics.timestamp).timestamp_millis()
    )
}

/// Minute, hour and day buckets kept as Redis hashes, one field per counter.
pub struct RedisMetricsStore {
    client: RedisClient,
}

impl RedisMetricsStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsStore for RedisMetricsStore {
    #[instrument(skip(self, metrics), fields(subject = %metrics.name))]
    async fn save_metrics(&self, metrics: &Metrics) -> DomainResult<()> {
        if metrics.values.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for aggregation in Aggregation::ALL {
            let key = metrics_key(&metrics.name, aggregation, metrics);
            for (field, value) in &metrics.values {
                pipe.cmd("HINCRBYFLOAT").arg(&key).arg(field).arg(*value).ignore();
            }
            pipe.cmd("PEXPIRE")
                .arg(&key)
                .arg(aggregation.ttl().as_millis() as u64)
                .ignore();
        }

        let mut conn = self.client.connection();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(counters = metrics.values.len(), "metrics saved");
        Ok(())
    }
}
