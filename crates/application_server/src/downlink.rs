use crate::domain::EventPipelineService;
use common::domain::{DownlinkRequest, EventContext};
use integration::IntegrationHandler;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Drains the downlink channels of the global integration handlers into the downlink
/// pipeline.
///
/// Each command is processed on its own task under a fresh root span. On shutdown every
/// source handler is closed first, which stops intake; commands already buffered in the
/// channel or in flight still run to completion, since they may hold the dedup lock.
pub struct DownlinkConsumer {
    service: Arc<EventPipelineService>,
    sources: Vec<DownlinkSource>,
}

struct DownlinkSource {
    name: &'static str,
    receiver: mpsc::Receiver<DownlinkRequest>,
    handler: Option<Arc<dyn IntegrationHandler>>,
}

impl DownlinkConsumer {
    pub fn new(service: Arc<EventPipelineService>) -> Self {
        Self {
            service,
            sources: Vec::new(),
        }
    }

    /// Takes the downlink channel of every handler that has one.
    pub fn with_handlers(mut self, handlers: &[Arc<dyn IntegrationHandler>]) -> Self {
        for handler in handlers {
            if let Some(receiver) = handler.take_downlink_receiver() {
                debug!(handler = handler.name(), "consuming downlink commands");
                self.sources.push(DownlinkSource {
                    name: handler.name(),
                    receiver,
                    handler: Some(handler.clone()),
                });
            }
        }
        self
    }

    pub fn with_receiver(
        mut self,
        source: &'static str,
        receiver: mpsc::Receiver<DownlinkRequest>,
    ) -> Self {
        self.sources.push(DownlinkSource {
            name: source,
            receiver,
            handler: None,
        });
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub async fn run(self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        info!(sources = self.sources.len(), "downlink consumer started");
        let tracker = TaskTracker::new();

        for source in self.sources {
            tracker.spawn(consume(
                source,
                self.service.clone(),
                tracker.clone(),
                cancellation_token.clone(),
            ));
        }

        tracker.close();
        tracker.wait().await;
        info!("downlink consumer stopped");
        Ok(())
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { self.run(ctx).await })
    }
}

async fn consume(
    source: DownlinkSource,
    service: Arc<EventPipelineService>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
) {
    let DownlinkSource {
        name,
        mut receiver,
        handler,
    } = source;

    let stop_intake = async {
        cancellation_token.cancelled().await;
        debug!(source = name, "stopping downlink intake");
        if let Some(handler) = &handler {
            if let Err(e) = handler.close().await {
                warn!(source = name, error = %e, "closing downlink source failed");
            }
        }
    };
    tokio::pin!(stop_intake);
    let mut stopped = false;

    loop {
        let request = tokio::select! {
            _ = &mut stop_intake, if !stopped => {
                stopped = true;
                receiver.close();
                continue;
            }
            request = receiver.recv() => match request {
                Some(request) => request,
                None => {
                    debug!(source = name, "downlink channel closed");
                    return;
                }
            },
        };

        let ctx = EventContext::new();
        let span = info_span!(
            parent: Span::none(),
            "downlink",
            source = name,
            correlation_id = %ctx.correlation_id,
            application_id = request.application_id,
            dev_eui = %request.dev_eui,
        );
        let service = service.clone();
        tracker.spawn(
            async move {
                // Not tied to shutdown: the command already holds the dedup lock.
                let token = CancellationToken::new();
                if let Err(e) = service.handle_downlink(ctx, request, &token).await {
                    error!(error = %e, "downlink command failed");
                }
            }
            .instrument(span),
        );
    }
}
