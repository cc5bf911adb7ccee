use common::grpc::{GrpcLoggingConfig, GrpcServerConfig, GrpcTlsConfig};
use common::postgres::PostgresConfig;
use common::redis::RedisConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use integration::{AwsSnsSettings, MqttIntegrationConfig, PostgresIntegrationConfig};
use lorix_codec::CodecConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // gRPC configuration
    /// gRPC server host
    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    /// gRPC server port
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Comma-separated RPC paths excluded from request logging
    #[serde(default = "default_grpc_ignored_paths")]
    pub grpc_ignored_paths: String,

    /// PEM CA bundle; enables mutual TLS when set together with cert and key
    #[serde(default)]
    pub grpc_tls_ca_cert: String,

    #[serde(default)]
    pub grpc_tls_cert: String,

    #[serde(default)]
    pub grpc_tls_key: String,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Redis configuration
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Expiry of the downlink dedup lock
    #[serde(default = "default_downlink_lock_ttl_ms")]
    pub downlink_lock_ttl_ms: u64,

    /// Approximate number of entries kept per device event stream
    #[serde(default = "default_event_log_max_len")]
    pub event_log_max_len: usize,

    #[serde(default = "default_event_log_ttl_secs")]
    pub event_log_ttl_secs: u64,

    // Codec configuration
    /// Wall-clock budget for one decoder or encoder script run
    #[serde(default = "default_codec_script_deadline_ms")]
    pub codec_script_deadline_ms: u64,

    /// Accept the extended Cayenne LPP type table
    #[serde(default)]
    pub codec_cayenne_extensions: bool,

    /// Key-encryption keys as `label=hexkey` pairs separated by commas
    #[serde(default)]
    pub kek_set: String,

    // Network server configuration
    #[serde(default = "default_network_server_endpoint")]
    pub network_server_endpoint: String,

    #[serde(default = "default_network_server_timeout_secs")]
    pub network_server_timeout_secs: u64,

    // Global MQTT integration
    #[serde(default)]
    pub mqtt_enabled: bool,

    #[serde(default = "default_mqtt_server")]
    pub mqtt_server: String,

    #[serde(default)]
    pub mqtt_username: String,

    #[serde(default)]
    pub mqtt_password: String,

    /// Random per process when empty
    #[serde(default)]
    pub mqtt_client_id: String,

    #[serde(default)]
    pub mqtt_qos: u8,

    #[serde(default = "default_mqtt_clean_session")]
    pub mqtt_clean_session: bool,

    /// Overrides for the per-event topic templates; empty keeps the default
    #[serde(default)]
    pub mqtt_uplink_topic_template: String,

    #[serde(default)]
    pub mqtt_join_topic_template: String,

    #[serde(default)]
    pub mqtt_ack_topic_template: String,

    #[serde(default)]
    pub mqtt_error_topic_template: String,

    #[serde(default)]
    pub mqtt_status_topic_template: String,

    #[serde(default)]
    pub mqtt_location_topic_template: String,

    #[serde(default)]
    pub mqtt_tx_ack_topic_template: String,

    #[serde(default)]
    pub mqtt_downlink_topic_template: String,

    #[serde(default)]
    pub mqtt_uplink_retained_message: bool,

    #[serde(default)]
    pub mqtt_join_retained_message: bool,

    #[serde(default)]
    pub mqtt_ack_retained_message: bool,

    #[serde(default)]
    pub mqtt_error_retained_message: bool,

    #[serde(default)]
    pub mqtt_status_retained_message: bool,

    #[serde(default)]
    pub mqtt_location_retained_message: bool,

    #[serde(default)]
    pub mqtt_tx_ack_retained_message: bool,

    #[serde(default)]
    pub mqtt_ca_cert: String,

    #[serde(default)]
    pub mqtt_tls_cert: String,

    #[serde(default)]
    pub mqtt_tls_key: String,

    // Global PostgreSQL integration; disabled when the DSN is empty
    #[serde(default)]
    pub postgres_integration_dsn: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_integration_max_pool_size: usize,

    // Global AWS SNS integration; disabled when the topic ARN is empty
    #[serde(default)]
    pub aws_sns_region: String,

    #[serde(default)]
    pub aws_sns_access_key_id: String,

    #[serde(default)]
    pub aws_sns_secret_access_key: String,

    #[serde(default)]
    pub aws_sns_topic_arn: String,

    /// Per-request timeout of the shared HTTP client used by per-application handlers
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "lorix".to_string()
}

fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    8001
}

fn default_grpc_ignored_paths() -> String {
    "/grpc.health.v1.Health/".to_string()
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "lorix".to_string()
}

fn default_postgres_username() -> String {
    "lorix".to_string()
}

fn default_postgres_password() -> String {
    "lorix".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_downlink_lock_ttl_ms() -> u64 {
    100
}

fn default_event_log_max_len() -> usize {
    10
}

fn default_event_log_ttl_secs() -> u64 {
    60 * 60
}

fn default_codec_script_deadline_ms() -> u64 {
    10
}

fn default_network_server_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_network_server_timeout_secs() -> u64 {
    5
}

fn default_mqtt_server() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_mqtt_clean_session() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn override_template(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("LORIX"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            log_level: self.log_level.clone(),
            otel_enabled: self.otel_enabled,
            otel_endpoint: self.otel_endpoint.clone(),
        }
    }

    pub fn grpc_server_config(&self) -> GrpcServerConfig {
        let ignored_paths: Vec<String> = self
            .grpc_ignored_paths
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let tls = (!self.grpc_tls_cert.is_empty()).then(|| GrpcTlsConfig {
            ca_cert_path: (!self.grpc_tls_ca_cert.is_empty())
                .then(|| self.grpc_tls_ca_cert.clone()),
            cert_path: self.grpc_tls_cert.clone(),
            key_path: self.grpc_tls_key.clone(),
        });

        GrpcServerConfig {
            host: self.grpc_host.clone(),
            port: self.grpc_port,
            logging_config: GrpcLoggingConfig::new(ignored_paths),
            tls,
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            downlink_lock_ttl_ms: self.downlink_lock_ttl_ms,
            event_log_max_len: self.event_log_max_len,
            event_log_ttl_secs: self.event_log_ttl_secs,
        }
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            script_deadline: Duration::from_millis(self.codec_script_deadline_ms),
            cayenne_extensions: self.codec_cayenne_extensions,
        }
    }

    /// Global MQTT settings, or `None` when the integration is disabled.
    pub fn mqtt_config(&self) -> Option<MqttIntegrationConfig> {
        if !self.mqtt_enabled {
            return None;
        }

        let mut config = MqttIntegrationConfig {
            server: self.mqtt_server.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            client_id: self.mqtt_client_id.clone(),
            qos: self.mqtt_qos,
            clean_session: self.mqtt_clean_session,
            uplink_retained_message: self.mqtt_uplink_retained_message,
            join_retained_message: self.mqtt_join_retained_message,
            ack_retained_message: self.mqtt_ack_retained_message,
            error_retained_message: self.mqtt_error_retained_message,
            status_retained_message: self.mqtt_status_retained_message,
            location_retained_message: self.mqtt_location_retained_message,
            tx_ack_retained_message: self.mqtt_tx_ack_retained_message,
            ca_cert: self.mqtt_ca_cert.clone(),
            tls_cert: self.mqtt_tls_cert.clone(),
            tls_key: self.mqtt_tls_key.clone(),
            ..MqttIntegrationConfig::default()
        };
        override_template(&mut config.uplink_topic_template, &self.mqtt_uplink_topic_template);
        override_template(&mut config.join_topic_template, &self.mqtt_join_topic_template);
        override_template(&mut config.ack_topic_template, &self.mqtt_ack_topic_template);
        override_template(&mut config.error_topic_template, &self.mqtt_error_topic_template);
        override_template(&mut config.status_topic_template, &self.mqtt_status_topic_template);
        override_template(
            &mut config.location_topic_template,
            &self.mqtt_location_topic_template,
        );
        override_template(&mut config.tx_ack_topic_template, &self.mqtt_tx_ack_topic_template);
        override_template(
            &mut config.downlink_topic_template,
            &self.mqtt_downlink_topic_template,
        );
        Some(config)
    }

    pub fn postgres_integration_config(&self) -> Option<PostgresIntegrationConfig> {
        (!self.postgres_integration_dsn.is_empty()).then(|| PostgresIntegrationConfig {
            dsn: self.postgres_integration_dsn.clone(),
            max_pool_size: self.postgres_integration_max_pool_size,
        })
    }

    pub fn aws_sns_settings(&self) -> Option<AwsSnsSettings> {
        (!self.aws_sns_topic_arn.is_empty()).then(|| AwsSnsSettings {
            aws_region: self.aws_sns_region.clone(),
            aws_access_key_id: self.aws_sns_access_key_id.clone(),
            aws_secret_access_key: self.aws_sns_secret_access_key.clone(),
            topic_arn: self.aws_sns_topic_arn.clone(),
        })
    }
}
