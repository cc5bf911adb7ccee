#![cfg(feature = "integration-tests")]

use application_server::domain::{
    ActivationContext, EventPipelineService, KekStore, KeyEnvelope, Services, UplinkData,
};
use application_server::downlink::DownlinkConsumer;
use async_trait::async_trait;
use common::domain::{
    AckEvent, DevAddr, DevEui, DeviceRepository, DownlinkCommand, DownlinkRequest, ErrorEvent,
    EventContext, GatewayId, IntegrationEvent, JoinEvent, LocationEvent, RxInfo, StatusEvent, TxAckEvent,
    TxInfo, UplinkEvent,
};
use common::postgres::{
    PostgresApplicationRepository, PostgresClient, PostgresConfig,
    PostgresDeviceProfileRepository, PostgresDeviceRepository, PostgresIntegrationRepository,
};
use common::redis::{event_log_key, RedisClient, RedisEventLog, RedisMetricsStore};
use common::MockNetworkServerClient;
use integration::{HandlerFactory, IntegrationHandler, MultiDispatcher};
use lorix_codec::{CodecRegistry, Variables};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::{Redis, REDIS_PORT};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../common/tests/fixtures/schema.sql");
const DEV_EUI: DevEui = DevEui::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
const DEV_ADDR: DevAddr = DevAddr::new([0x01, 0x02, 0x03, 0x04]);
const APP_S_KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";

/// Global handler forwarding every delivered event to a channel.
struct CapturingHandler {
    events: mpsc::UnboundedSender<IntegrationEvent>,
}

#[async_trait]
impl IntegrationHandler for CapturingHandler {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn handle_uplink_event(&self, _: &Variables, e: &UplinkEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Uplink(e.clone()));
        Ok(())
    }

    async fn handle_join_event(&self, _: &Variables, e: &JoinEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Join(e.clone()));
        Ok(())
    }

    async fn handle_ack_event(&self, _: &Variables, e: &AckEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Ack(e.clone()));
        Ok(())
    }

    async fn handle_error_event(&self, _: &Variables, e: &ErrorEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Error(e.clone()));
        Ok(())
    }

    async fn handle_status_event(&self, _: &Variables, e: &StatusEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Status(e.clone()));
        Ok(())
    }

    async fn handle_location_event(
        &self,
        _: &Variables,
        e: &LocationEvent,
    ) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::Location(e.clone()));
        Ok(())
    }

    async fn handle_tx_ack_event(&self, _: &Variables, e: &TxAckEvent) -> integration::Result<()> {
        let _ = self.events.send(IntegrationEvent::TxAck(e.clone()));
        Ok(())
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> integration::Result<()> {
        Ok(())
    }
}

struct TestEnv {
    _postgres: ContainerAsync<Postgres>,
    _redis: ContainerAsync<Redis>,
    postgres: PostgresClient,
    redis: RedisClient,
    application_id: i64,
}

async fn setup() -> TestEnv {
    let postgres_container = Postgres::default().start().await.unwrap();
    let host = postgres_container.get_host().await.unwrap();
    let port = postgres_container.get_host_port_ipv4(5432).await.unwrap();
    let postgres = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .unwrap();

    let conn = postgres.get_connection().await.unwrap();
    conn.batch_execute(SCHEMA).await.unwrap();
    let application_id: i64 = conn
        .query_one(
            "INSERT INTO application (name, payload_codec) VALUES ('weather', 'CAYENNE_LPP') RETURNING id",
            &[],
        )
        .await
        .unwrap()
        .get(0);
    let profile_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO device_profile (id, name) VALUES ($1, 'class-a')",
        &[&profile_id],
    )
    .await
    .unwrap();
    conn.execute(
        "INSERT INTO device (dev_eui, application_id, device_profile_id, name, tags)
         VALUES ($1, $2, $3, 'station-1', '{\"site\": \"roof\"}')",
        &[&DEV_EUI.as_bytes().as_slice(), &application_id, &profile_id],
    )
    .await
    .unwrap();

    let redis_container = Redis::default().start().await.unwrap();
    let redis_host = redis_container.get_host().await.unwrap();
    let redis_port = redis_container.get_host_port_ipv4(REDIS_PORT).await.unwrap();
    let redis = RedisClient::connect(&format!("redis://{}:{}", redis_host, redis_port))
        .await
        .unwrap();

    TestEnv {
        _postgres: postgres_container,
        _redis: redis_container,
        postgres,
        redis,
        application_id,
    }
}

fn build_service(
    env: &TestEnv,
    network_server: MockNetworkServerClient,
) -> (Arc<EventPipelineService>, mpsc::UnboundedReceiver<IntegrationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let global: Vec<Arc<dyn IntegrationHandler>> = vec![Arc::new(CapturingHandler { events: tx })];
    let dispatcher = MultiDispatcher::new(
        global,
        Arc::new(PostgresIntegrationRepository::new(env.postgres.clone())),
        HandlerFactory::default(),
    );

    let services = Services {
        devices: Arc::new(PostgresDeviceRepository::new(env.postgres.clone())),
        applications: Arc::new(PostgresApplicationRepository::new(env.postgres.clone())),
        device_profiles: Arc::new(PostgresDeviceProfileRepository::new(env.postgres.clone())),
        dispatcher: Arc::new(dispatcher),
        metrics: Arc::new(RedisMetricsStore::new(env.redis.clone())),
        event_log: Arc::new(RedisEventLog::new(
            env.redis.clone(),
            10,
            Duration::from_secs(60),
        )),
        codecs: Arc::new(CodecRegistry::default()),
        keys: Arc::new(KekStore::new()),
        network_server: Arc::new(network_server),
    };
    (Arc::new(EventPipelineService::new(services)), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<IntegrationEvent>) -> IntegrationEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event not delivered in time")
        .expect("event channel closed")
}

fn uplink(f_cnt: u32, data: Vec<u8>) -> UplinkData {
    UplinkData {
        f_cnt,
        f_port: 3,
        dr: 5,
        adr: true,
        data,
        rx_info: vec![RxInfo {
            gateway_id: GatewayId::new([0xaa; 8]),
            time: None,
            rssi: -60,
            lora_snr: 7.5,
            channel: 1,
            rf_chain: 0,
            board: 0,
            antenna: 0,
            location: None,
        }],
        tx_info: TxInfo {
            frequency: 868_100_000,
            lora_modulation_info: None,
        },
        activation: Some(ActivationContext {
            dev_addr: DEV_ADDR,
            app_s_key: KeyEnvelope {
                kek_label: String::new(),
                aes_key: APP_S_KEY.parse::<common::domain::AesKey>().unwrap().as_bytes().to_vec(),
            },
        }),
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_first_uplink_joins_decodes_and_persists() {
    let env = setup().await;
    let (service, mut events) = build_service(&env, MockNetworkServerClient::new());

    service
        .handle_uplink(
            EventContext::new(),
            DEV_EUI,
            uplink(10, vec![0x40, 0xd6, 0xbb, 0x98]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // Deliveries run concurrently, so the two events may arrive in either order.
    let mut join = None;
    let mut up = None;
    for _ in 0..2 {
        match next_event(&mut events).await {
            IntegrationEvent::Join(e) => join = Some(e),
            IntegrationEvent::Uplink(e) => up = Some(e),
            other => panic!("unexpected event {:?}", other.kind()),
        }
    }
    assert_eq!(join.expect("join event").dev_addr, DEV_ADDR);
    let up = up.expect("uplink event");
    assert_eq!(up.application_id, env.application_id);
    assert_eq!(up.data, vec![0x03, 0x67, 0x01, 0x10]);
    assert_eq!(up.object, Some(json!({"temperatureSensor": {"3": 27.2}})));

    let device = PostgresDeviceRepository::new(env.postgres.clone())
        .get_device(&DEV_EUI)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.activation.map(|a| a.dev_addr), Some(DEV_ADDR));
    assert_eq!(device.dr, Some(5));
    assert!(device.last_seen_at.is_some());

    let mut conn = env.redis.connection();
    let len: usize = redis::cmd("XLEN")
        .arg(event_log_key(&DEV_EUI))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(len, 2);

    // Same session again: data only.
    service
        .handle_uplink(
            EventContext::new(),
            DEV_EUI,
            uplink(10, vec![0x40, 0xd6, 0xbb, 0x98]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        IntegrationEvent::Uplink(_)
    ));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_downlink_command_is_encrypted_and_queued() {
    let env = setup().await;

    let mut network_server = MockNetworkServerClient::new();
    network_server
        .expect_get_next_downlink_fcnt()
        .returning(|_| Ok(1));
    let (queued_tx, mut queued_rx) = mpsc::unbounded_channel();
    network_server
        .expect_create_device_queue_item()
        .returning(move |item| {
            let _ = queued_tx.send(item);
            Ok(())
        });
    let (service, _events) = build_service(&env, network_server);

    // Establish the session first.
    service
        .handle_uplink(
            EventContext::new(),
            DEV_EUI,
            uplink(10, vec![0x40, 0xd6, 0xbb, 0x98]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let (commands_tx, commands_rx) = mpsc::channel(1);
    let token = CancellationToken::new();
    let consumer = tokio::spawn(
        DownlinkConsumer::new(service)
            .with_receiver("test", commands_rx)
            .run(token.clone()),
    );

    commands_tx
        .send(DownlinkRequest {
            application_id: env.application_id,
            dev_eui: DEV_EUI,
            command: DownlinkCommand {
                confirmed: true,
                f_port: 10,
                data: Some((0u8..20).collect()),
                object: None,
            },
        })
        .await
        .unwrap();

    let item = tokio::time::timeout(Duration::from_secs(5), queued_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.f_cnt, 1);
    assert!(item.confirmed);
    assert_eq!(
        hex::encode(&item.frm_payload),
        "39cb02d29c7b841b6873483c1c3851b9bdd32fbf"
    );

    token.cancel();
    consumer.await.unwrap().unwrap();
}
