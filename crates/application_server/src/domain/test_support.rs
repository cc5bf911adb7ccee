use crate::domain::{KekStore, Services};
use common::domain::{
    AesKey, Application, CodecSettings, DevAddr, DevEui, Device, DeviceActivation, DeviceProfile,
    GatewayId, LoraModulationInfo, RxInfo, Tags, TxInfo,
};
use common::{
    MockApplicationRepository, MockDeviceProfileRepository, MockDeviceRepository,
    MockEventDispatcher, MockEventLog, MockMetricsStore, MockNetworkServerClient,
};
use lorix_codec::CodecRegistry;
use std::sync::Arc;
use uuid::Uuid;

pub const DEV_EUI: DevEui = DevEui::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
pub const DEV_ADDR: DevAddr = DevAddr::new([0x01, 0x02, 0x03, 0x04]);
pub const GATEWAY_ID: GatewayId = GatewayId::new([0xaa; 8]);
pub const PROFILE_ID: Uuid = Uuid::from_u128(0x5e55_1011);

pub fn app_s_key() -> AesKey {
    "2b7e151628aed2a6abf7158809cf4f3c".parse().unwrap()
}

pub fn session() -> DeviceActivation {
    DeviceActivation {
        dev_addr: DEV_ADDR,
        app_s_key: app_s_key(),
    }
}

/// Services whose collaborators panic on any call.
pub fn services() -> Services {
    Services {
        devices: Arc::new(MockDeviceRepository::new()),
        applications: Arc::new(MockApplicationRepository::new()),
        device_profiles: Arc::new(MockDeviceProfileRepository::new()),
        dispatcher: Arc::new(MockEventDispatcher::new()),
        metrics: Arc::new(MockMetricsStore::new()),
        event_log: Arc::new(MockEventLog::new()),
        codecs: Arc::new(CodecRegistry::default()),
        keys: Arc::new(KekStore::new()),
        network_server: Arc::new(MockNetworkServerClient::new()),
    }
}

pub fn services_with(configure: impl FnOnce(&mut Services)) -> Services {
    let mut services = services();
    configure(&mut services);
    services
}

/// Event log accepting every append.
pub fn event_log() -> MockEventLog {
    let mut event_log = MockEventLog::new();
    event_log.expect_append().returning(|_, _| Ok(()));
    event_log
}

pub fn device(activation: Option<DeviceActivation>) -> Device {
    Device {
        dev_eui: DEV_EUI,
        application_id: 7,
        device_profile_id: PROFILE_ID,
        name: "station-1".to_string(),
        activation,
        last_seen_at: None,
        dr: None,
        status: None,
        latitude: None,
        longitude: None,
        altitude: None,
        tags: Tags::from([("site".to_string(), Some("roof".to_string()))]),
        variables: Tags::from([
            ("unit".to_string(), Some("celsius".to_string())),
            ("unset".to_string(), None),
        ]),
    }
}

pub fn application(codec: CodecSettings) -> Application {
    Application {
        id: 7,
        name: "weather".to_string(),
        codec,
    }
}

pub fn device_profile(codec: CodecSettings) -> DeviceProfile {
    DeviceProfile {
        id: PROFILE_ID,
        name: "class-a".to_string(),
        codec,
    }
}

/// Repositories resolving the test device, its application and its profile.
pub fn resolving(
    device: Device,
    application: Application,
    profile: DeviceProfile,
) -> (MockDeviceRepository, MockApplicationRepository, MockDeviceProfileRepository) {
    let mut devices = MockDeviceRepository::new();
    devices
        .expect_get_device()
        .return_once(move |_| Ok(Some(device)));
    let mut applications = MockApplicationRepository::new();
    applications
        .expect_get_application()
        .return_once(move |_| Ok(Some(application)));
    let mut profiles = MockDeviceProfileRepository::new();
    profiles
        .expect_get_device_profile()
        .return_once(move |_| Ok(Some(profile)));
    (devices, applications, profiles)
}

pub fn rx_info(rssi: i32, snr: f64) -> RxInfo {
    RxInfo {
        gateway_id: GATEWAY_ID,
        time: Some("2024-01-01T12:00:00Z".parse().unwrap()),
        rssi,
        lora_snr: snr,
        channel: 1,
        rf_chain: 0,
        board: 0,
        antenna: 0,
        location: None,
    }
}

pub fn tx_info() -> TxInfo {
    TxInfo {
        frequency: 868_100_000,
        lora_modulation_info: Some(LoraModulationInfo {
            bandwidth: 125,
            spreading_factor: 7,
            code_rate: "4/5".to_string(),
        }),
    }
}
