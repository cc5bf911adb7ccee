use crate::domain::{DomainError, DomainResult};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrationKind {
    Http,
    Mqtt,
    InfluxDb,
    AwsSns,
    ThingsBoard,
    PostgreSql,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Http => "HTTP",
            IntegrationKind::Mqtt => "MQTT",
            IntegrationKind::InfluxDb => "INFLUXDB",
            IntegrationKind::AwsSns => "AWS_SNS",
            IntegrationKind::ThingsBoard => "THINGSBOARD",
            IntegrationKind::PostgreSql => "POSTGRESQL",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(IntegrationKind::Http),
            "MQTT" => Ok(IntegrationKind::Mqtt),
            "INFLUXDB" => Ok(IntegrationKind::InfluxDb),
            "AWS_SNS" => Ok(IntegrationKind::AwsSns),
            "THINGSBOARD" => Ok(IntegrationKind::ThingsBoard),
            "POSTGRESQL" => Ok(IntegrationKind::PostgreSql),
            other => Err(DomainError::ValidationError(format!(
                "unknown integration kind: {}",
                other
            ))),
        }
    }
}

/// Per-application integration record. `settings` is interpreted by the handler for `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub id: i64,
    pub application_id: i64,
    pub kind: IntegrationKind,
    pub settings: serde_json::Value,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn list_integrations(&self, application_id: i64) -> DomainResult<Vec<Integration>>;
}
