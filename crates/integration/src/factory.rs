use crate::aws_sns::{AwsSnsHandler, AwsSnsSettings, SnsClientCache};
use crate::handler::IntegrationHandler;
use crate::http::{HttpHandler, HttpSettings};
use crate::influxdb::{InfluxDbHandler, InfluxDbSettings};
use crate::thingsboard::{ThingsBoardHandler, ThingsBoardSettings};
use crate::{IntegrationError, Result};
use common::domain::{Integration, IntegrationKind};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Builds per-application handlers from stored integration records.
///
/// MQTT and PostgreSQL hold long-lived connections and are configured globally only.
#[derive(Clone, Default)]
pub struct HandlerFactory {
    client: reqwest::Client,
    sns_clients: SnsClientCache,
}

impl HandlerFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            sns_clients: SnsClientCache::default(),
        }
    }

    pub fn create(&self, integration: &Integration) -> Result<Arc<dyn IntegrationHandler>> {
        let settings = &integration.settings;
        match integration.kind {
            IntegrationKind::Http => Ok(Arc::new(HttpHandler::new(
                self.client.clone(),
                parse(settings)?,
            )?)),
            IntegrationKind::InfluxDb => Ok(Arc::new(InfluxDbHandler::new(
                self.client.clone(),
                parse(settings)?,
            )?)),
            IntegrationKind::AwsSns => Ok(Arc::new(AwsSnsHandler::with_cache(
                &self.sns_clients,
                parse(settings)?,
            )?)),
            IntegrationKind::ThingsBoard => Ok(Arc::new(ThingsBoardHandler::new(
                self.client.clone(),
                parse(settings)?,
            )?)),
            kind @ (IntegrationKind::Mqtt | IntegrationKind::PostgreSql) => {
                Err(global_only(kind))
            }
        }
    }

    /// Checks a settings document for `kind` without building a handler.
    pub fn validate_settings(kind: IntegrationKind, settings: &Value) -> Result<()> {
        match kind {
            IntegrationKind::Http => parse::<HttpSettings>(settings)?.validate(),
            IntegrationKind::InfluxDb => parse::<InfluxDbSettings>(settings)?.validate(),
            IntegrationKind::AwsSns => parse::<AwsSnsSettings>(settings)?.validate(),
            IntegrationKind::ThingsBoard => parse::<ThingsBoardSettings>(settings)?.validate(),
            IntegrationKind::Mqtt | IntegrationKind::PostgreSql => Err(global_only(kind)),
        }
    }
}

fn parse<T: DeserializeOwned>(settings: &Value) -> Result<T> {
    serde_json::from_value(settings.clone())
        .map_err(|e| IntegrationError::Config(format!("invalid settings: {}", e)))
}

fn global_only(kind: IntegrationKind) -> IntegrationError {
    IntegrationError::Unsupported(format!(
        "{} integrations can only be configured globally",
        kind
    ))
}
