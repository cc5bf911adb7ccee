//! HTTP integration: POSTs the event JSON to the URLs configured for its kind.

use crate::handler::IntegrationHandler;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use common::domain::{
    AckEvent, DownlinkRequest, ErrorEvent, EventKind, JoinEvent, LocationEvent, StatusEvent,
    TxAckEvent, UplinkEvent,
};
use lorix_codec::Variables;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

static HEADER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9-]+$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-application HTTP settings. Every URL field may hold a comma-separated list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSettings {
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "uplinkDataURL")]
    pub uplink_data_url: String,
    #[serde(rename = "joinNotificationURL")]
    pub join_notification_url: String,
    #[serde(rename = "ackNotificationURL")]
    pub ack_notification_url: String,
    #[serde(rename = "errorNotificationURL")]
    pub error_notification_url: String,
    #[serde(rename = "statusNotificationURL")]
    pub status_notification_url: String,
    #[serde(rename = "locationNotificationURL")]
    pub location_notification_url: String,
    #[serde(rename = "txAckNotificationURL")]
    pub tx_ack_notification_url: String,
    pub timeout_ms: Option<u64>,
}

impl HttpSettings {
    pub fn validate(&self) -> Result<()> {
        for name in self.headers.keys() {
            if !HEADER_NAME.is_match(name) {
                return Err(IntegrationError::Config(format!(
                    "invalid header name '{}': only letters, digits and '-' are allowed",
                    name
                )));
            }
        }
        for kind in EventKind::ALL {
            for url in split_urls(self.urls_for(kind)) {
                let parsed = reqwest::Url::parse(url).map_err(|e| {
                    IntegrationError::Config(format!("invalid {} url '{}': {}", kind, url, e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(IntegrationError::Config(format!(
                        "unsupported scheme in {} url '{}'",
                        kind, url
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn urls_for(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Up => &self.uplink_data_url,
            EventKind::Join => &self.join_notification_url,
            EventKind::Ack => &self.ack_notification_url,
            EventKind::Error => &self.error_notification_url,
            EventKind::Status => &self.status_notification_url,
            EventKind::Location => &self.location_notification_url,
            EventKind::TxAck => &self.tx_ack_notification_url,
        }
    }
}

fn split_urls(urls: &str) -> impl Iterator<Item = &str> {
    urls.split(',').map(str::trim).filter(|url| !url.is_empty())
}

pub struct HttpHandler {
    client: reqwest::Client,
    settings: HttpSettings,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpHandler {
    pub fn new(client: reqwest::Client, settings: HttpSettings) -> Result<Self> {
        settings.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| IntegrationError::Config(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| IntegrationError::Config(e.to_string()))?;
            headers.insert(name, value);
        }

        let timeout = settings
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            client,
            settings,
            headers,
            timeout,
        })
    }

    /// Posts to every configured URL; the first failure is returned after all attempts.
    #[instrument(skip(self, event), fields(event = %kind))]
    async fn post<T: Serialize + Sync>(&self, kind: EventKind, event: &T) -> Result<()> {
        let body = serde_json::to_vec(event)?;
        let mut first_error = None;

        for url in split_urls(self.settings.urls_for(kind)) {
            let outcome = self.post_one(url, body.clone()).await;
            match outcome {
                Ok(()) => debug!(url = %url, "event posted"),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn post_one(&self, url: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntegrationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IntegrationHandler for HttpHandler {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn handle_uplink_event(&self, _vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.post(EventKind::Up, event).await
    }

    async fn handle_join_event(&self, _vars: &Variables, event: &JoinEvent) -> Result<()> {
        self.post(EventKind::Join, event).await
    }

    async fn handle_ack_event(&self, _vars: &Variables, event: &AckEvent) -> Result<()> {
        self.post(EventKind::Ack, event).await
    }

    async fn handle_error_event(&self, _vars: &Variables, event: &ErrorEvent) -> Result<()> {
        self.post(EventKind::Error, event).await
    }

    async fn handle_status_event(&self, _vars: &Variables, event: &StatusEvent) -> Result<()> {
        self.post(EventKind::Status, event).await
    }

    async fn handle_location_event(&self, _vars: &Variables, event: &LocationEvent) -> Result<()> {
        self.post(EventKind::Location, event).await
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, event: &TxAckEvent) -> Result<()> {
        self.post(EventKind::TxAck, event).await
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
