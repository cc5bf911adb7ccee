//! AWS SNS integration: publishes each event as JSON to one topic.

use crate::handler::IntegrationHandler;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use aws_sdk_sns::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::types::MessageAttributeValue;
use common::domain::{
    AckEvent, DevEui, DownlinkRequest, ErrorEvent, EventKind, JoinEvent, LocationEvent,
    StatusEvent, TxAckEvent, UplinkEvent,
};
use lorix_codec::Variables;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

static TOPIC_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:sns:[a-z0-9-]+:\d{12}:[A-Za-z0-9_-]{1,256}(\.fifo)?$")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSnsSettings {
    #[serde(rename = "awsRegion")]
    pub aws_region: String,
    #[serde(rename = "awsAccessKeyID")]
    pub aws_access_key_id: String,
    #[serde(rename = "awsSecretAccessKey")]
    pub aws_secret_access_key: String,
    #[serde(rename = "topicARN")]
    pub topic_arn: String,
}

impl AwsSnsSettings {
    pub fn validate(&self) -> Result<()> {
        if self.aws_region.is_empty() {
            return Err(IntegrationError::Config("awsRegion is required".to_string()));
        }
        if !TOPIC_ARN.is_match(&self.topic_arn) {
            return Err(IntegrationError::Config(format!(
                "invalid topic ARN '{}'",
                self.topic_arn
            )));
        }
        Ok(())
    }
}

/// Attributes subscribers can filter on.
pub fn message_attributes(
    kind: EventKind,
    dev_eui: &DevEui,
    application_id: i64,
) -> Result<HashMap<String, MessageAttributeValue>> {
    let attribute = |value: String| {
        MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| IntegrationError::Config(e.to_string()))
    };

    Ok(HashMap::from([
        ("event".to_string(), attribute(kind.to_string())?),
        ("dev_eui".to_string(), attribute(dev_eui.to_string())?),
        ("application_id".to_string(), attribute(application_id.to_string())?),
    ]))
}

/// SDK clients shared across handler instances, keyed by region and credentials.
///
/// Per-application handlers are rebuilt for every event; the client and its connection
/// pool are not.
#[derive(Clone, Default)]
pub struct SnsClientCache {
    clients: Arc<Mutex<HashMap<ClientKey, aws_sdk_sns::Client>>>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

impl SnsClientCache {
    pub fn client_for(&self, settings: &AwsSnsSettings) -> aws_sdk_sns::Client {
        let key = ClientKey {
            region: settings.aws_region.clone(),
            access_key_id: settings.aws_access_key_id.clone(),
            secret_access_key: settings.aws_secret_access_key.clone(),
        };
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(key)
            .or_insert_with(|| build_client(settings))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_client(settings: &AwsSnsSettings) -> aws_sdk_sns::Client {
    let mut config = aws_sdk_sns::Config::builder()
        .region(Region::new(settings.aws_region.clone()))
        .behavior_version(BehaviorVersion::latest());
    if !settings.aws_access_key_id.is_empty() {
        config = config.credentials_provider(Credentials::new(
            settings.aws_access_key_id.clone(),
            settings.aws_secret_access_key.clone(),
            None,
            None,
            "lorix",
        ));
    }
    aws_sdk_sns::Client::from_conf(config.build())
}

pub struct AwsSnsHandler {
    client: aws_sdk_sns::Client,
    topic_arn: String,
}

impl AwsSnsHandler {
    pub fn new(settings: AwsSnsSettings) -> Result<Self> {
        Self::with_cache(&SnsClientCache::default(), settings)
    }

    /// Builds a handler reusing a cached client for the same region and credentials.
    pub fn with_cache(cache: &SnsClientCache, settings: AwsSnsSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            client: cache.client_for(&settings),
            topic_arn: settings.topic_arn,
        })
    }

    #[instrument(skip(self, event), fields(event = %kind, dev_eui = %dev_eui))]
    async fn publish<T: Serialize + Sync>(
        &self,
        kind: EventKind,
        dev_eui: &DevEui,
        application_id: i64,
        event: &T,
    ) -> Result<()> {
        let message = serde_json::to_string(event)?;

        let output = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message)
            .set_message_attributes(Some(message_attributes(kind, dev_eui, application_id)?))
            .send()
            .await
            .map_err(|e| IntegrationError::transport(DisplayErrorContext(e)))?;

        debug!(message_id = ?output.message_id(), "event published");
        Ok(())
    }
}

#[async_trait]
impl IntegrationHandler for AwsSnsHandler {
    fn name(&self) -> &'static str {
        "aws_sns"
    }

    async fn handle_uplink_event(&self, _vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.publish(EventKind::Up, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_join_event(&self, _vars: &Variables, event: &JoinEvent) -> Result<()> {
        self.publish(EventKind::Join, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_ack_event(&self, _vars: &Variables, event: &AckEvent) -> Result<()> {
        self.publish(EventKind::Ack, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_error_event(&self, _vars: &Variables, event: &ErrorEvent) -> Result<()> {
        self.publish(EventKind::Error, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_status_event(&self, _vars: &Variables, event: &StatusEvent) -> Result<()> {
        self.publish(EventKind::Status, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_location_event(&self, _vars: &Variables, event: &LocationEvent) -> Result<()> {
        self.publish(EventKind::Location, &event.dev_eui, event.application_id, event)
            .await
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, event: &TxAckEvent) -> Result<()> {
        self.publish(EventKind::TxAck, &event.dev_eui, event.application_id, event)
            .await
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
