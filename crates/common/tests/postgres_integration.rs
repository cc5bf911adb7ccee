#![cfg(feature = "integration-tests")]

use chrono::Utc;
use common::domain::{
    AesKey, ApplicationRepository, BatteryState, DevAddr, DevEui, DeviceActivation,
    DeviceProfileRepository, DeviceRepository, DeviceStatus, DomainError, IntegrationKind,
    IntegrationRepository, Location, LocationSource, UplinkDeviceUpdate,
};
use common::postgres::{
    PostgresApplicationRepository, PostgresClient, PostgresConfig, PostgresDeviceProfileRepository,
    PostgresDeviceRepository, PostgresIntegrationRepository,
};
use lorix_codec::CodecSelector;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

const SCHEMA: &str = include_str!("fixtures/schema.sql");
const DEV_EUI: DevEui = DevEui::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

struct TestDb {
    _container: ContainerAsync<Postgres>,
    client: PostgresClient,
    application_id: i64,
    profile_id: Uuid,
}

async fn setup_test_db() -> TestDb {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    let conn = client.get_connection().await.unwrap();
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
        "INSERT INTO device_profile (id, name, payload_codec, payload_decoder_script)
         VALUES ($1, 'js-profile', 'CUSTOM_JS', 'function Decode() { return {}; }')",
        &[&profile_id],
    )
    .await
    .unwrap();

    conn.execute(
        "INSERT INTO device (dev_eui, application_id, device_profile_id, name, dev_addr, app_s_key, tags, variables)
         VALUES ($1, $2, $3, 'station-1', $4, $5, '{\"site\": \"roof\", \"floor\": null}', '{\"unit\": \"c\"}')",
        &[
            &DEV_EUI.as_bytes().as_slice(),
            &application_id,
            &profile_id,
            &[0u8; 4].as_slice(),
            &[0u8; 16].as_slice(),
        ],
    )
    .await
    .unwrap();

    TestDb {
        _container: postgres,
        client,
        application_id,
        profile_id,
    }
}

fn activation(addr: u8, key: u8) -> DeviceActivation {
    DeviceActivation {
        dev_addr: DevAddr::new([0x01, 0x02, 0x03, addr]),
        app_s_key: AesKey::new([key; 16]),
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_get_device_reads_all_fields() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    let device = repo.get_device(&DEV_EUI).await.unwrap().unwrap();

    assert_eq!(device.name, "station-1");
    assert_eq!(device.application_id, db.application_id);
    assert_eq!(device.device_profile_id, db.profile_id);
    assert_eq!(device.activation, None);
    assert_eq!(device.tags.get("site"), Some(&Some("roof".to_string())));
    assert_eq!(device.tags.get("floor"), Some(&None));
    assert_eq!(device.variables().get("unit").map(String::as_str), Some("c"));

    let missing = DevEui::new([9; 8]);
    assert!(repo.get_device(&missing).await.unwrap().is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_record_uplink_rotates_session_once() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());
    let update = UplinkDeviceUpdate {
        last_seen_at: Utc::now(),
        dr: 5,
        activation: Some(activation(0x04, 0xAA)),
    };

    let rotated = repo.record_uplink(&DEV_EUI, &update).await.unwrap();
    assert!(rotated);

    let rotated_again = repo.record_uplink(&DEV_EUI, &update).await.unwrap();
    assert!(!rotated_again);

    let device = repo.get_device(&DEV_EUI).await.unwrap().unwrap();
    assert_eq!(device.activation, Some(activation(0x04, 0xAA)));
    assert_eq!(device.dr, Some(5));
    assert!(device.last_seen_at.is_some());

    let new_session = UplinkDeviceUpdate {
        activation: Some(activation(0x05, 0xBB)),
        ..update
    };
    assert!(repo.record_uplink(&DEV_EUI, &new_session).await.unwrap());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_record_uplink_without_activation_keeps_session() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    let rotated = repo
        .record_uplink(
            &DEV_EUI,
            &UplinkDeviceUpdate {
                last_seen_at: Utc::now(),
                dr: 2,
                activation: None,
            },
        )
        .await
        .unwrap();

    assert!(!rotated);
    let device = repo.get_device(&DEV_EUI).await.unwrap().unwrap();
    assert_eq!(device.activation, None);
    assert_eq!(device.dr, Some(2));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_record_uplink_unknown_device() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    let result = repo
        .record_uplink(
            &DevEui::new([9; 8]),
            &UplinkDeviceUpdate {
                last_seen_at: Utc::now(),
                dr: 0,
                activation: None,
            },
        )
        .await;

    assert!(matches!(result, Err(DomainError::DeviceNotFound(_))));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_update_status_and_location() {
    let db = setup_test_db().await;
    let repo = PostgresDeviceRepository::new(db.client.clone());

    repo.update_status(
        &DEV_EUI,
        &DeviceStatus {
            margin: 7,
            battery: BatteryState::Level(55.5),
        },
    )
    .await
    .unwrap();
    repo.update_location(
        &DEV_EUI,
        &Location {
            latitude: 52.1,
            longitude: 4.3,
            altitude: 12.0,
            source: LocationSource::Gps,
            accuracy: 0,
        },
    )
    .await
    .unwrap();

    let device = repo.get_device(&DEV_EUI).await.unwrap().unwrap();
    assert_eq!(
        device.status,
        Some(DeviceStatus {
            margin: 7,
            battery: BatteryState::Level(55.5),
        })
    );
    assert_eq!(device.latitude, Some(52.1));
    assert_eq!(device.longitude, Some(4.3));
    assert_eq!(device.altitude, Some(12.0));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_application_and_profile_lookup() {
    let db = setup_test_db().await;
    let applications = PostgresApplicationRepository::new(db.client.clone());
    let profiles = PostgresDeviceProfileRepository::new(db.client.clone());

    let app = applications
        .get_application(db.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.name, "weather");
    assert_eq!(app.codec.codec, CodecSelector::CayenneLpp);

    let profile = profiles
        .get_device_profile(&db.profile_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.codec.codec, CodecSelector::CustomJs);
    assert!(profile.codec.decoder_script.is_some());

    assert!(applications.get_application(-1).await.unwrap().is_none());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_list_integrations() {
    let db = setup_test_db().await;
    let conn = db.client.get_connection().await.unwrap();
    conn.execute(
        "INSERT INTO integration (application_id, kind, settings) VALUES
            ($1, 'HTTP', '{\"uplinkDataURL\": \"http://example.com\"}'),
            ($1, 'CARRIER_PIGEON', '{}')",
        &[&db.application_id],
    )
    .await
    .unwrap();
    let repo = PostgresIntegrationRepository::new(db.client.clone());

    let integrations = repo.list_integrations(db.application_id).await.unwrap();

    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0].kind, IntegrationKind::Http);
    assert_eq!(integrations[0].settings["uplinkDataURL"], "http://example.com");
}
