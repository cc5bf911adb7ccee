use crate::factory::HandlerFactory;
use crate::handler::{deliver, IntegrationHandler};
use common::domain::{
    DevEui, EventContext, EventDispatcher, IntegrationEvent, IntegrationRepository,
};
use lorix_codec::Variables;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, warn, Instrument};

/// Completion signal of the most recent fan-out for a device.
struct Lane {
    seq: u64,
    done: oneshot::Receiver<()>,
}

type Lanes = Arc<Mutex<HashMap<DevEui, Lane>>>;

/// Fans each event out to the global handlers plus the handlers configured for the
/// event's application.
///
/// Every handler runs on its own task; a failing or panicking handler is logged with its
/// name and the correlation id and never affects its siblings. Fan-outs for the same
/// device run one after another in dispatch order, so a join reaches every handler before
/// the uplink that caused it.
pub struct MultiDispatcher {
    global: Vec<Arc<dyn IntegrationHandler>>,
    integrations: Arc<dyn IntegrationRepository>,
    factory: HandlerFactory,
    lanes: Lanes,
    next_seq: AtomicU64,
}

impl MultiDispatcher {
    pub fn new(
        global: Vec<Arc<dyn IntegrationHandler>>,
        integrations: Arc<dyn IntegrationRepository>,
        factory: HandlerFactory,
    ) -> Self {
        Self {
            global,
            integrations,
            factory,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn global_handlers(&self) -> &[Arc<dyn IntegrationHandler>] {
        &self.global
    }

    /// Spawns the fan-out and returns a handle that completes once every delivery has
    /// finished. Dropping the handle leaves the fan-out running.
    pub fn spawn_dispatch(
        &self,
        ctx: &EventContext,
        variables: &Variables,
        event: IntegrationEvent,
    ) -> JoinHandle<()> {
        let global = self.global.clone();
        let integrations = self.integrations.clone();
        let factory = self.factory.clone();
        let variables = Arc::new(variables.clone());
        let event = Arc::new(event);

        let dev_eui = event.dev_eui();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dev_eui, Lane { seq, done: done_rx });
        let lanes = self.lanes.clone();

        let span = info_span!(
            "dispatch",
            correlation_id = %ctx.correlation_id,
            event = %event.kind(),
            application_id = event.application_id(),
            dev_eui = %event.dev_eui(),
        );

        tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    // A dropped sender means the earlier fan-out is gone; proceed either way.
                    let _ = previous.done.await;
                }

                let application_handlers =
                    application_handlers(&*integrations, &factory, event.application_id()).await;

                let deliveries: Vec<_> = global
                    .iter()
                    .chain(application_handlers.iter())
                    .map(|handler| {
                        let handler = handler.clone();
                        let variables = variables.clone();
                        let event = event.clone();
                        let name = handler.name();
                        let task = tokio::spawn(
                            async move { deliver(&*handler, &variables, &event).await }
                                .in_current_span(),
                        );
                        (name, task)
                    })
                    .collect();

                for (name, task) in deliveries {
                    match task.await {
                        Ok(Ok(())) => debug!(handler = name, "event delivered"),
                        Ok(Err(e)) => error!(handler = name, error = %e, "integration handler failed"),
                        Err(e) => error!(handler = name, error = %e, "integration handler panicked"),
                    }
                }

                release_lane(&lanes, dev_eui, seq);
                let _ = done_tx.send(());

                for handler in application_handlers {
                    if let Err(e) = handler.close().await {
                        warn!(handler = handler.name(), error = %e, "closing application handler failed");
                    }
                }
            }
            .instrument(span),
        )
    }
}

fn release_lane(lanes: &Lanes, dev_eui: DevEui, seq: u64) {
    let mut lanes = lanes.lock().unwrap_or_else(PoisonError::into_inner);
    if lanes.get(&dev_eui).map(|lane| lane.seq) == Some(seq) {
        lanes.remove(&dev_eui);
    }
}

async fn application_handlers(
    integrations: &dyn IntegrationRepository,
    factory: &HandlerFactory,
    application_id: i64,
) -> Vec<Arc<dyn IntegrationHandler>> {
    let records = match integrations.list_integrations(application_id).await {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "loading application integrations failed");
            return Vec::new();
        }
    };

    records
        .iter()
        .filter_map(|integration| match factory.create(integration) {
            Ok(handler) => Some(handler),
            Err(e) => {
                error!(
                    integration_id = integration.id,
                    kind = %integration.kind,
                    error = %e,
                    "building application integration failed"
                );
                None
            }
        })
        .collect()
}

impl EventDispatcher for MultiDispatcher {
    fn dispatch(&self, ctx: &EventContext, variables: &Variables, event: IntegrationEvent) {
        // Detached: deliveries outlive the originating request.
        drop(self.spawn_dispatch(ctx, variables, event));
    }
}
