use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_level: String,
    pub otel_enabled: bool,
    pub otel_endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "lorix".to_string(),
            log_level: "info".to_string(),
            otel_enabled: false,
            otel_endpoint: "http://localhost:4317".to_string(),
        }
    }
}
