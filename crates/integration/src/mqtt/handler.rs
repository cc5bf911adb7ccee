use super::{MqttIntegrationConfig, TopicTemplate};
use crate::handler::IntegrationHandler;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use common::domain::{
    AckEvent, DevEui, DomainError, DomainResult, DownlinkCommand, DownlinkLock, DownlinkRequest,
    ErrorEvent, EventKind, JoinEvent, LocationEvent, StatusEvent, TxAckEvent, UplinkEvent,
};
use lorix_codec::Variables;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};
use uuid::Uuid;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 100;

/// A rendered MQTT message.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// Per-event topic templates and retain flags.
#[derive(Debug, Clone)]
pub struct EventTopics {
    topics: BTreeMap<EventKind, (TopicTemplate, bool)>,
}

impl EventTopics {
    pub fn from_config(config: &MqttIntegrationConfig) -> Result<Self> {
        let mut topics = BTreeMap::new();
        for kind in EventKind::ALL {
            let template = TopicTemplate::parse(config.topic_template(kind))?;
            topics.insert(kind, (template, config.retained(kind)));
        }
        Ok(Self { topics })
    }

    pub fn publication<T: Serialize>(
        &self,
        kind: EventKind,
        application_id: i64,
        dev_eui: &DevEui,
        event: &T,
    ) -> Result<Publication> {
        let (template, retain) = self
            .topics
            .get(&kind)
            .ok_or_else(|| IntegrationError::Config(format!("no topic for {} events", kind)))?;
        Ok(Publication {
            topic: template.render(application_id, dev_eui),
            retain: *retain,
            payload: serde_json::to_vec(event)?,
        })
    }
}

/// Parses and de-duplicates one inbound downlink message.
///
/// Returns `None` when another instance already claimed the command.
pub async fn handle_downlink_message(
    template: &TopicTemplate,
    lock: &dyn DownlinkLock,
    topic: &str,
    payload: &[u8],
) -> DomainResult<Option<DownlinkRequest>> {
    let (application_id, dev_eui) = template.capture(topic).ok_or_else(|| {
        DomainError::ValidationError(format!("topic '{}' does not match the downlink template", topic))
    })?;

    let command: DownlinkCommand = serde_json::from_slice(payload)
        .map_err(|e| DomainError::ValidationError(format!("invalid downlink payload: {}", e)))?;
    command.validate()?;

    if !lock.try_acquire(application_id, &dev_eui).await? {
        return Ok(None);
    }

    Ok(Some(DownlinkRequest {
        application_id,
        dev_eui,
        command,
    }))
}

struct EventLoopContext {
    client: AsyncClient,
    qos: QoS,
    subscription: String,
    template: Arc<TopicTemplate>,
    lock: Arc<dyn DownlinkLock>,
    sender: mpsc::Sender<DownlinkRequest>,
    tracker: TaskTracker,
    closing: CancellationToken,
}

async fn run_event_loop(mut event_loop: EventLoop, ctx: EventLoopContext) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to mqtt broker");
                match ctx.client.try_subscribe(&ctx.subscription, ctx.qos) {
                    Ok(()) => info!(topic = %ctx.subscription, "subscribing to downlink topic"),
                    Err(e) => error!(error = %e, "subscribing to downlink topic failed"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                ctx.tracker.spawn(process_downlink(
                    ctx.template.clone(),
                    ctx.lock.clone(),
                    ctx.sender.clone(),
                    publish.topic,
                    publish.payload.to_vec(),
                ));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("disconnected from mqtt broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if ctx.closing.is_cancelled() {
                    break;
                }
                error!(error = %e, "mqtt connection error, reconnecting");
                tokio::select! {
                    _ = ctx.closing.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    debug!("mqtt event loop stopped");
}

async fn process_downlink(
    template: Arc<TopicTemplate>,
    lock: Arc<dyn DownlinkLock>,
    sender: mpsc::Sender<DownlinkRequest>,
    topic: String,
    payload: Vec<u8>,
) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_downlink",
        topic = %topic,
        payload_size = payload.len(),
    );

    async {
        match handle_downlink_message(&template, &*lock, &topic, &payload).await {
            Ok(Some(request)) => {
                if sender.send(request).await.is_err() {
                    warn!("downlink channel closed, dropping command");
                }
            }
            Ok(None) => debug!("downlink claimed by another instance"),
            Err(e) => error!(error = %e, "rejecting downlink command"),
        }
    }
    .instrument(span)
    .await
}

async fn tls_transport(config: &MqttIntegrationConfig) -> Result<Transport> {
    let read = |path: String| async move {
        tokio::fs::read(&path)
            .await
            .map_err(|e| IntegrationError::Config(format!("reading {}: {}", path, e)))
    };

    let ca = read(config.ca_cert.clone()).await?;
    let client_auth = if config.tls_cert.is_empty() {
        None
    } else {
        Some((read(config.tls_cert.clone()).await?, read(config.tls_key.clone()).await?))
    };
    Ok(Transport::tls(ca, client_auth, None))
}

/// Global MQTT integration: publishes events and ingests downlink commands.
pub struct MqttHandler {
    client: AsyncClient,
    topics: EventTopics,
    qos: QoS,
    downlink_subscription: String,
    downlink_rx: Mutex<Option<mpsc::Receiver<DownlinkRequest>>>,
    event_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    tracker: TaskTracker,
    closing: CancellationToken,
}

impl MqttHandler {
    /// Starts the connection loop. Connecting happens in the background and is retried
    /// every two seconds until [`IntegrationHandler::close`] is called.
    pub async fn start(config: &MqttIntegrationConfig, lock: Arc<dyn DownlinkLock>) -> Result<Self> {
        config.validate()?;
        let address = config.broker_address()?;
        let qos = config.qos()?;
        let topics = EventTopics::from_config(config)?;
        let template = Arc::new(TopicTemplate::parse_subscription(
            &config.downlink_topic_template,
        )?);
        let downlink_subscription = template.subscription();

        let client_id = if config.client_id.is_empty() {
            format!("lorix-{}", Uuid::new_v4().simple())
        } else {
            config.client_id.clone()
        };
        let mut options = MqttOptions::new(client_id, address.host.clone(), address.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(config.clean_session);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if address.tls {
            options.set_transport(tls_transport(config).await?);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (sender, receiver) = mpsc::channel(config.downlink_channel_capacity.max(1));
        let tracker = TaskTracker::new();
        let closing = CancellationToken::new();

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            EventLoopContext {
                client: client.clone(),
                qos,
                subscription: downlink_subscription.clone(),
                template,
                lock,
                sender,
                tracker: tracker.clone(),
                closing: closing.clone(),
            },
        ));

        info!(host = %address.host, port = address.port, tls = address.tls, "mqtt integration started");

        Ok(Self {
            client,
            topics,
            qos,
            downlink_subscription,
            downlink_rx: Mutex::new(Some(receiver)),
            event_loop: tokio::sync::Mutex::new(Some(handle)),
            tracker,
            closing,
        })
    }

    #[instrument(skip(self, event), fields(event = %kind, dev_eui = %dev_eui))]
    fn publish<T: Serialize>(
        &self,
        kind: EventKind,
        application_id: i64,
        dev_eui: &DevEui,
        event: &T,
    ) -> Result<()> {
        let publication = self.topics.publication(kind, application_id, dev_eui, event)?;
        self.client
            .try_publish(
                publication.topic.clone(),
                self.qos,
                publication.retain,
                publication.payload,
            )
            .map_err(IntegrationError::transport)?;
        debug!(topic = %publication.topic, "event published");
        Ok(())
    }
}

#[async_trait]
impl IntegrationHandler for MqttHandler {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn handle_uplink_event(&self, _vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.publish(EventKind::Up, event.application_id, &event.dev_eui, event)
    }

    async fn handle_join_event(&self, _vars: &Variables, event: &JoinEvent) -> Result<()> {
        self.publish(EventKind::Join, event.application_id, &event.dev_eui, event)
    }

    async fn handle_ack_event(&self, _vars: &Variables, event: &AckEvent) -> Result<()> {
        self.publish(EventKind::Ack, event.application_id, &event.dev_eui, event)
    }

    async fn handle_error_event(&self, _vars: &Variables, event: &ErrorEvent) -> Result<()> {
        self.publish(EventKind::Error, event.application_id, &event.dev_eui, event)
    }

    async fn handle_status_event(&self, _vars: &Variables, event: &StatusEvent) -> Result<()> {
        self.publish(EventKind::Status, event.application_id, &event.dev_eui, event)
    }

    async fn handle_location_event(&self, _vars: &Variables, event: &LocationEvent) -> Result<()> {
        self.publish(EventKind::Location, event.application_id, &event.dev_eui, event)
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, event: &TxAckEvent) -> Result<()> {
        self.publish(EventKind::TxAck, event.application_id, &event.dev_eui, event)
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        self.downlink_rx.lock().ok().and_then(|mut receiver| receiver.take())
    }

    /// Unsubscribes, disconnects and waits for in-flight downlink handling to drain. The
    /// downlink channel is closed once this returns. Later calls are no-ops.
    async fn close(&self) -> Result<()> {
        if self.closing.is_cancelled() {
            return Ok(());
        }
        if let Err(e) = self.client.try_unsubscribe(self.downlink_subscription.clone()) {
            warn!(error = %e, "unsubscribing from downlink topic failed");
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "disconnecting from mqtt broker failed");
        }
        self.closing.cancel();

        let handle = self.event_loop.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                warn!("mqtt event loop did not stop in time, aborting");
                handle.abort();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("mqtt integration closed");
        Ok(())
    }
}
