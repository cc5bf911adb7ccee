use anyhow::Result;
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::{BatchLogProcessor, LoggerProvider},
    propagation::TraceContextPropagator,
    runtime,
    trace::{Sampler, TracerProvider},
    Resource,
};
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::TelemetryConfig;

/// OTLP providers kept alive for the process lifetime; flushed by [`Telemetry::shutdown`].
pub struct Telemetry {
    tracer_provider: TracerProvider,
    logger_provider: LoggerProvider,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("failed to flush traces: {:?}", e);
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("failed to flush logs: {:?}", e);
        }
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

fn otel_resource(config: &TelemetryConfig) -> Resource {
    Resource::new(vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        config.service_name.clone(),
    )])
}

fn tracer_provider(config: &TelemetryConfig, resource: Resource) -> Result<TracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build())
}

fn logger_provider(config: &TelemetryConfig, resource: Resource) -> Result<LoggerProvider> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    Ok(LoggerProvider::builder()
        .with_log_processor(BatchLogProcessor::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build())
}

/// Installs the global subscriber: JSON logs on stdout and, when enabled, OTLP export of
/// spans and log events.
///
/// Returns the OTLP providers when export is enabled so the caller can flush them on exit.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<Telemetry>> {
    fn stdout_layer<S>() -> impl Layer<S>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
    }

    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(stdout_layer())
            .init();
        return Ok(None);
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = otel_resource(config);
    let tracer_provider = tracer_provider(config, resource.clone())?;
    let logger_provider = logger_provider(config, resource)?;

    // Span layer goes first so the log bridge sees the active OTel context.
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("lorix")))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .with(stdout_layer())
        .init();

    Ok(Some(Telemetry {
        tracer_provider,
        logger_provider,
    }))
}
