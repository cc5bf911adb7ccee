use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Expiry of the downlink dedup lock in milliseconds.
    pub downlink_lock_ttl_ms: u64,
    /// Approximate cap on entries kept per device event stream.
    pub event_log_max_len: usize,
    /// Expiry of an idle device event stream in seconds.
    pub event_log_ttl_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            downlink_lock_ttl_ms: 100,
            event_log_max_len: 10,
            event_log_ttl_secs: 60 * 60,
        }
    }
}
