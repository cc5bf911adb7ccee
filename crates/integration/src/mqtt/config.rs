use super::TopicTemplate;
use crate::{IntegrationError, Result};
use common::domain::EventKind;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};

const DEFAULT_TOPIC_PREFIX: &str = "application/{{ .ApplicationID }}/device/{{ .DevEUI }}";

/// Global MQTT integration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttIntegrationConfig {
    /// `tcp://host:port` or `ssl://host:port`.
    pub server: String,
    pub username: String,
    pub password: String,
    /// Random when empty.
    pub client_id: String,
    pub qos: u8,
    pub clean_session: bool,
    pub keep_alive_secs: u64,
    pub downlink_channel_capacity: usize,

    pub uplink_topic_template: String,
    pub join_topic_template: String,
    pub ack_topic_template: String,
    pub error_topic_template: String,
    pub status_topic_template: String,
    pub location_topic_template: String,
    pub tx_ack_topic_template: String,
    pub downlink_topic_template: String,

    pub uplink_retained_message: bool,
    pub join_retained_message: bool,
    pub ack_retained_message: bool,
    pub error_retained_message: bool,
    pub status_retained_message: bool,
    pub location_retained_message: bool,
    pub tx_ack_retained_message: bool,

    pub ca_cert: String,
    pub tls_cert: String,
    pub tls_key: String,
}

impl Default for MqttIntegrationConfig {
    fn default() -> Self {
        let topic = |suffix: &str| format!("{}/{}", DEFAULT_TOPIC_PREFIX, suffix);
        Self {
            server: "tcp://localhost:1883".to_string(),
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            qos: 0,
            clean_session: true,
            keep_alive_secs: 30,
            downlink_channel_capacity: 100,
            uplink_topic_template: topic("rx"),
            join_topic_template: topic("join"),
            ack_topic_template: topic("ack"),
            error_topic_template: topic("error"),
            status_topic_template: topic("status"),
            location_topic_template: topic("location"),
            tx_ack_topic_template: topic("txack"),
            downlink_topic_template: topic("tx"),
            uplink_retained_message: false,
            join_retained_message: false,
            ack_retained_message: false,
            error_retained_message: false,
            status_retained_message: false,
            location_retained_message: false,
            tx_ack_retained_message: false,
            ca_cert: String::new(),
            tls_cert: String::new(),
            tls_key: String::new(),
        }
    }
}

/// Broker address parsed from [`MqttIntegrationConfig::server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl MqttIntegrationConfig {
    pub fn topic_template(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Up => &self.uplink_topic_template,
            EventKind::Join => &self.join_topic_template,
            EventKind::Ack => &self.ack_topic_template,
            EventKind::Error => &self.error_topic_template,
            EventKind::Status => &self.status_topic_template,
            EventKind::Location => &self.location_topic_template,
            EventKind::TxAck => &self.tx_ack_topic_template,
        }
    }

    pub fn retained(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Up => self.uplink_retained_message,
            EventKind::Join => self.join_retained_message,
            EventKind::Ack => self.ack_retained_message,
            EventKind::Error => self.error_retained_message,
            EventKind::Status => self.status_retained_message,
            EventKind::Location => self.location_retained_message,
            EventKind::TxAck => self.tx_ack_retained_message,
        }
    }

    pub fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(IntegrationError::Config(format!("invalid qos: {}", other))),
        }
    }

    pub fn broker_address(&self) -> Result<BrokerAddress> {
        let (tls, rest, default_port) = if let Some(rest) = self.server.strip_prefix("ssl://") {
            (true, rest, 8883)
        } else if let Some(rest) = self.server.strip_prefix("tcp://") {
            (false, rest, 1883)
        } else {
            return Err(IntegrationError::Config(format!(
                "server '{}' must start with tcp:// or ssl://",
                self.server
            )));
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    IntegrationError::Config(format!("invalid port in server '{}'", self.server))
                })?;
                (host, port)
            }
            None => (rest, default_port),
        };
        if host.is_empty() {
            return Err(IntegrationError::Config(format!(
                "missing host in server '{}'",
                self.server
            )));
        }

        Ok(BrokerAddress {
            host: host.to_string(),
            port,
            tls,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.qos()?;
        let address = self.broker_address()?;
        if address.tls && self.ca_cert.is_empty() {
            return Err(IntegrationError::Config(
                "ssl:// server requires ca_cert".to_string(),
            ));
        }
        if self.tls_cert.is_empty() != self.tls_key.is_empty() {
            return Err(IntegrationError::Config(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }
        for kind in EventKind::ALL {
            TopicTemplate::parse(self.topic_template(kind))?;
        }
        TopicTemplate::parse_subscription(&self.downlink_topic_template)?;
        Ok(())
    }
}
