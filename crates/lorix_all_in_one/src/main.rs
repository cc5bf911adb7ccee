mod config;

use application_server::application_server::ApplicationServer;
use application_server::domain::{EventPipelineService, KekStore, Services};
use application_server::downlink::DownlinkConsumer;
use application_server::grpc::GrpcNetworkServerClient;
use common::domain::DownlinkLock;
use common::postgres::{
    PostgresApplicationRepository, PostgresClient, PostgresDeviceProfileRepository,
    PostgresDeviceRepository, PostgresIntegrationRepository,
};
use common::redis::{RedisClient, RedisDownlinkLock, RedisEventLog, RedisMetricsStore};
use common::telemetry::{init_telemetry, Telemetry};
use config::ServiceConfig;
use integration::{
    AwsSnsHandler, HandlerFactory, IntegrationHandler, MqttHandler, MultiDispatcher,
    PostgresHandler,
};
use lorix_codec::CodecRegistry;
use lorix_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry: Option<Telemetry> = match init_telemetry(&config.telemetry_config()) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting lorix application server"
    );
    debug!(
        grpc_port = config.grpc_port,
        postgres_host = %config.postgres_host,
        redis_url = %config.redis_url,
        mqtt_enabled = config.mqtt_enabled,
        "configuration loaded"
    );

    let deps = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize shared dependencies");
            std::process::exit(1);
        }
    };

    let global_handlers = match initialize_global_handlers(&config, deps.downlink_lock.clone()).await
    {
        Ok(handlers) => handlers,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize global integrations");
            std::process::exit(1);
        }
    };

    let keys = match KekStore::parse(&config.kek_set) {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "Invalid key-encryption key set");
            std::process::exit(1);
        }
    };

    let network_server = match GrpcNetworkServerClient::connect_lazy(
        &config.network_server_endpoint,
        Duration::from_secs(config.network_server_timeout_secs),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Invalid network-server endpoint");
            std::process::exit(1);
        }
    };

    let http_client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let dispatcher = Arc::new(MultiDispatcher::new(
        global_handlers.clone(),
        deps.integrations.clone(),
        HandlerFactory::new(http_client),
    ));

    let redis_config = config.redis_config();
    let services = Services {
        devices: deps.devices,
        applications: deps.applications,
        device_profiles: deps.device_profiles,
        dispatcher,
        metrics: Arc::new(RedisMetricsStore::new(deps.redis.clone())),
        event_log: Arc::new(RedisEventLog::new(
            deps.redis.clone(),
            redis_config.event_log_max_len,
            Duration::from_secs(redis_config.event_log_ttl_secs),
        )),
        codecs: Arc::new(CodecRegistry::new(config.codec_config())),
        keys: Arc::new(keys),
        network_server: Arc::new(network_server),
    };
    let service = Arc::new(EventPipelineService::new(services));

    info!(
        keks = service.services().keys.len(),
        global_integrations = global_handlers.len(),
        "application server wired"
    );

    // Initialize application modules
    let application_server = ApplicationServer::new(service.clone(), config.grpc_server_config());
    let downlink_consumer = DownlinkConsumer::new(service).with_handlers(&global_handlers);

    // Build runner with all processes
    let mut runner = Runner::new().with_named_process(
        "application_server",
        application_server.into_runner_process(),
    );

    if downlink_consumer.source_count() > 0 {
        runner = runner.with_named_process(
            "downlink_consumer",
            downlink_consumer.into_runner_process(),
        );
    } else {
        debug!("no integration delivers downlink commands");
    }

    // Add cleanup handlers
    runner = runner
        .with_closer({
            let postgres = deps.postgres;
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    // Downlink sources were already closed and drained by the consumer.
                    for handler in &global_handlers {
                        if let Err(e) = handler.close().await {
                            warn!(handler = handler.name(), error = %e, "closing integration failed");
                        }
                    }
                    postgres.close();

                    // Shutdown telemetry and flush pending traces and logs
                    if let Some(telemetry) = telemetry {
                        telemetry.shutdown();
                    }

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    // Run the service
    runner.run().await;
}

struct SharedDependencies {
    postgres: PostgresClient,
    redis: RedisClient,
    devices: Arc<PostgresDeviceRepository>,
    applications: Arc<PostgresApplicationRepository>,
    device_profiles: Arc<PostgresDeviceProfileRepository>,
    integrations: Arc<PostgresIntegrationRepository>,
    downlink_lock: Arc<dyn DownlinkLock>,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    // PostgreSQL initialization
    info!("Initializing PostgreSQL...");
    let postgres = PostgresClient::new(&config.postgres_config())?;
    postgres.ping().await?;

    // Redis initialization
    info!("Initializing Redis...");
    let redis_config = config.redis_config();
    let redis = RedisClient::connect(&redis_config.url).await?;
    redis.ping().await?;

    Ok(SharedDependencies {
        devices: Arc::new(PostgresDeviceRepository::new(postgres.clone())),
        applications: Arc::new(PostgresApplicationRepository::new(postgres.clone())),
        device_profiles: Arc::new(PostgresDeviceProfileRepository::new(postgres.clone())),
        integrations: Arc::new(PostgresIntegrationRepository::new(postgres.clone())),
        downlink_lock: Arc::new(RedisDownlinkLock::new(
            redis.clone(),
            Duration::from_millis(redis_config.downlink_lock_ttl_ms),
        )),
        postgres,
        redis,
    })
}

async fn initialize_global_handlers(
    config: &ServiceConfig,
    downlink_lock: Arc<dyn DownlinkLock>,
) -> anyhow::Result<Vec<Arc<dyn IntegrationHandler>>> {
    let mut handlers: Vec<Arc<dyn IntegrationHandler>> = Vec::new();

    if let Some(mqtt) = config.mqtt_config() {
        info!("Initializing global MQTT integration...");
        handlers.push(Arc::new(MqttHandler::start(&mqtt, downlink_lock).await?));
    }

    if let Some(postgres) = config.postgres_integration_config() {
        info!("Initializing global PostgreSQL integration...");
        handlers.push(Arc::new(PostgresHandler::connect(&postgres).await?));
    }

    if let Some(sns) = config.aws_sns_settings() {
        info!("Initializing global AWS SNS integration...");
        handlers.push(Arc::new(AwsSnsHandler::new(sns)?));
    }

    Ok(handlers)
}
