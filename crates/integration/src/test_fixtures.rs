use common::domain::{
    AckEvent, DevEui, ErrorEvent, ErrorType, GatewayId, JoinEvent, Location, LocationEvent,
    LocationSource, LoraModulationInfo, RxInfo, StatusEvent, Tags, TxAckEvent, TxInfo,
    UplinkEvent, DevAddr,
};
use serde_json::json;

pub const DEV_EUI: DevEui = DevEui::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

pub fn tags() -> Tags {
    Tags::from([("site".to_string(), Some("roof".to_string()))])
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

pub fn rx_info(rssi: i32, snr: f64) -> RxInfo {
    RxInfo {
        gateway_id: GatewayId::new([0xaa; 8]),
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

pub fn uplink_event() -> UplinkEvent {
    UplinkEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        dev_addr: Some(DevAddr::new([1, 2, 3, 4])),
        rx_info: vec![rx_info(-80, 7.5), rx_info(-60, 3.0)],
        tx_info: tx_info(),
        adr: true,
        dr: 5,
        f_cnt: 10,
        f_port: 2,
        data: vec![0x03, 0x67, 0x01, 0x10],
        object: Some(json!({
            "temperature": 21.5,
            "count": 3,
            "gps": {"latitude": 52.3, "longitude": 4.9, "altitude": 12},
            "label": "north"
        })),
        tags: tags(),
    }
}

pub fn join_event() -> JoinEvent {
    JoinEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        dev_addr: DevAddr::new([1, 2, 3, 4]),
        rx_info: vec![rx_info(-80, 7.5)],
        tx_info: tx_info(),
        dr: 5,
        tags: tags(),
    }
}

pub fn ack_event() -> AckEvent {
    AckEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        acknowledged: true,
        f_cnt: 11,
        tags: tags(),
    }
}

pub fn error_event() -> ErrorEvent {
    ErrorEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        error_type: ErrorType::UplinkCodec,
        error: "function must return object".to_string(),
        f_cnt: 10,
        tags: tags(),
    }
}

pub fn status_event() -> StatusEvent {
    StatusEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        margin: 10,
        external_power_source: false,
        battery_level_unavailable: false,
        battery_level: 75.5,
        tags: tags(),
    }
}

pub fn location_event() -> LocationEvent {
    LocationEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        location: Location {
            latitude: 52.3,
            longitude: 4.9,
            altitude: 12.0,
            source: LocationSource::GeoResolverTdoa,
            accuracy: 25,
        },
        tags: tags(),
    }
}

pub fn tx_ack_event() -> TxAckEvent {
    TxAckEvent {
        application_id: 7,
        application_name: "weather".to_string(),
        device_name: "station-1".to_string(),
        dev_eui: DEV_EUI,
        f_cnt: 4,
        gateway_id: GatewayId::new([0xaa; 8]),
        tx_info: tx_info(),
        tags: tags(),
    }
}

/// Minimal HTTP/1.1 responder capturing each request as (request line + headers, body).
pub mod http_server {
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub head: String,
        pub body: String,
    }

    impl CapturedRequest {
        pub fn header(&self, name: &str) -> Option<String> {
            self.head.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim().to_string())
            })
        }

        pub fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or_default()
        }
    }

    /// Starts a responder answering every request with `status`. Returns its base URL.
    pub async fn start(status: u16) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let (head, body_start, content_length) = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buffer.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                            let head = String::from_utf8_lossy(&buffer[..pos]).to_string();
                            let content_length = head
                                .lines()
                                .find_map(|line| {
                                    let (key, value) = line.split_once(':')?;
                                    key.trim()
                                        .eq_ignore_ascii_case("content-length")
                                        .then(|| value.trim().parse::<usize>().ok())
                                        .flatten()
                                })
                                .unwrap_or(0);
                            break (head, pos + 4, content_length);
                        }
                    };
                    while buffer.len() < body_start + content_length {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buffer.extend_from_slice(&chunk[..n]);
                    }
                    let body = String::from_utf8_lossy(&buffer[body_start..]).to_string();
                    sink.lock().unwrap().push(CapturedRequest { head, body });

                    let response = format!(
                        "HTTP/1.1 {} Test\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                        status
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), captured)
    }
}
