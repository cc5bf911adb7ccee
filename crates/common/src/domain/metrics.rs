use crate::domain::{DevEui, DomainResult, GatewayId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;

/// Bucket granularity of the time-series metrics store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Minute,
    Hour,
    Day,
}

impl Aggregation {
    pub const ALL: [Aggregation; 3] = [Aggregation::Minute, Aggregation::Hour, Aggregation::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Minute => "MINUTE",
            Aggregation::Hour => "HOUR",
            Aggregation::Day => "DAY",
        }
    }

    pub fn bucket_width(&self) -> Duration {
        match self {
            Aggregation::Minute => Duration::minutes(1),
            Aggregation::Hour => Duration::hours(1),
            Aggregation::Day => Duration::days(1),
        }
    }

    /// How long a bucket is retained after its last write.
    pub fn ttl(&self) -> std::time::Duration {
        match self {
            Aggregation::Minute => std::time::Duration::from_secs(60 * 60),
            Aggregation::Hour => std::time::Duration::from_secs(48 * 60 * 60),
            Aggregation::Day => std::time::Duration::from_secs(60 * 24 * 60 * 60),
        }
    }

    /// Start of the bucket containing `timestamp`, UTC aligned.
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        timestamp
            .duration_trunc(self.bucket_width())
            .unwrap_or(timestamp)
    }
}

/// Counters to add into the buckets of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn for_device(dev_eui: &DevEui, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: format!("device:{}", dev_eui),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn for_gateway(gateway_id: &GatewayId, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: format!("gw:{}", gateway_id),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        *self.values.entry(key.into()).or_insert(0.0) += value;
        self
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Adds the counters into every aggregation bucket. Additions commute.
    async fn save_metrics(&self, metrics: &Metrics) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start() {
        let ts: DateTime<Utc> = "2024-03-05T13:47:21.500Z".parse().unwrap();
        assert_eq!(
            Aggregation::Minute.bucket_start(ts),
            "2024-03-05T13:47:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            Aggregation::Hour.bucket_start(ts),
            "2024-03-05T13:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            Aggregation::Day.bucket_start(ts),
            "2024-03-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_metrics_add_accumulates() {
        let mut metrics = Metrics::for_device(&DevEui::new([1; 8]), Utc::now());
        metrics.add("rx_count", 1.0).add("rx_count", 1.0).add("gw_rssi_sum", -80.0);

        assert_eq!(metrics.name, "device:0101010101010101");
        assert_eq!(metrics.values["rx_count"], 2.0);
        assert_eq!(metrics.values["gw_rssi_sum"], -80.0);
    }
}
