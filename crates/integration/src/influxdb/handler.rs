use super::line_protocol::{self, FieldValue, Measurement};
use super::{InfluxDbSettings, InfluxDbVersion};
use crate::handler::IntegrationHandler;
use crate::http::DEFAULT_TIMEOUT;
use crate::{IntegrationError, Result};
use async_trait::async_trait;
use common::domain::{
    AckEvent, DevEui, DownlinkRequest, ErrorEvent, JoinEvent, LocationEvent, StatusEvent, Tags,
    TxAckEvent, UplinkEvent,
};
use lorix_codec::Variables;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

/// Writes uplink, status and location events as line-protocol measurements.
pub struct InfluxDbHandler {
    client: reqwest::Client,
    settings: InfluxDbSettings,
    write_url: reqwest::Url,
    timeout: Duration,
}

impl InfluxDbHandler {
    pub fn new(client: reqwest::Client, settings: InfluxDbSettings) -> Result<Self> {
        settings.validate()?;
        let write_url = settings.write_url()?;
        let timeout = settings
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            client,
            settings,
            write_url,
            timeout,
        })
    }

    #[instrument(skip(self, measurements), fields(count = measurements.len()))]
    async fn write(&self, measurements: &[Measurement]) -> Result<()> {
        let body = line_protocol::encode(measurements);
        if body.is_empty() {
            return Ok(());
        }

        let mut request = self
            .client
            .post(self.write_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .timeout(self.timeout)
            .body(body);

        request = match self.settings.version {
            InfluxDbVersion::V1 if !self.settings.username.is_empty() => {
                request.basic_auth(&self.settings.username, Some(&self.settings.password))
            }
            InfluxDbVersion::V2 if !self.settings.token.is_empty() => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.settings.token),
            ),
            _ => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntegrationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("measurements written");
        Ok(())
    }
}

/// Device tags with a value, overlaid by the identity tags every measurement carries.
fn base_tags(
    device_tags: &Tags,
    application_name: &str,
    device_name: &str,
    dev_eui: &DevEui,
) -> BTreeMap<String, String> {
    let mut tags: BTreeMap<String, String> = device_tags
        .iter()
        .filter_map(|(key, value)| Some((key.clone(), value.clone()?)))
        .collect();
    tags.insert("application_name".to_string(), application_name.to_string());
    tags.insert("device_name".to_string(), device_name.to_string());
    tags.insert("dev_eui".to_string(), dev_eui.to_string());
    tags
}

pub fn uplink_measurements(event: &UplinkEvent) -> Vec<Measurement> {
    let tags = base_tags(&event.tags, &event.application_name, &event.device_name, &event.dev_eui);

    let mut uplink_tags = tags.clone();
    uplink_tags.insert("dr".to_string(), event.dr.to_string());
    uplink_tags.insert("frequency".to_string(), event.tx_info.frequency.to_string());

    let mut uplink = Measurement::new("device_uplink", uplink_tags)
        .value("value", FieldValue::Integer(1))
        .value("f_cnt", FieldValue::Integer(event.f_cnt.into()));
    if let Some(rssi) = event.max_rssi() {
        uplink = uplink.value("rssi", FieldValue::Integer(rssi.into()));
    }
    if let Some(snr) = event.max_snr() {
        uplink = uplink.value("snr", FieldValue::Float(snr));
    }

    let mut measurements = vec![uplink];

    if let Some(object) = &event.object {
        let mut data_tags = tags;
        data_tags.insert("f_port".to_string(), event.f_port.to_string());
        line_protocol::expand_object("device_frmpayload_data", object, &data_tags, &mut measurements);
    }

    measurements
}

/// Raw LoRaWAN battery value: 0 on external power, 255 when unavailable, otherwise 1..=254.
fn raw_battery(event: &StatusEvent) -> i64 {
    if event.external_power_source {
        0
    } else if event.battery_level_unavailable {
        255
    } else {
        ((f64::from(event.battery_level) / 100.0 * 254.0).round() as i64).clamp(1, 254)
    }
}

pub fn status_measurements(event: &StatusEvent) -> Vec<Measurement> {
    let tags = base_tags(&event.tags, &event.application_name, &event.device_name, &event.dev_eui);

    let mut measurements = vec![
        Measurement::new("device_status_battery", tags.clone())
            .value("value", FieldValue::Integer(raw_battery(event))),
        Measurement::new("device_status_margin", tags.clone())
            .value("value", FieldValue::Integer(event.margin.into())),
    ];

    if !event.external_power_source && !event.battery_level_unavailable {
        measurements.push(
            Measurement::new("device_status_battery_level", tags)
                .value("value", FieldValue::Float(event.battery_level.into())),
        );
    }

    measurements
}

pub fn location_measurements(event: &LocationEvent) -> Vec<Measurement> {
    let tags = base_tags(&event.tags, &event.application_name, &event.device_name, &event.dev_eui);
    let location = &event.location;

    vec![line_protocol::location_measurement(
        "device_location".to_string(),
        tags,
        location.latitude,
        location.longitude,
    )
    .value("altitude", FieldValue::Float(location.altitude))
    .value("accuracy", FieldValue::Integer(location.accuracy.into()))]
}

#[async_trait]
impl IntegrationHandler for InfluxDbHandler {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn handle_uplink_event(&self, _vars: &Variables, event: &UplinkEvent) -> Result<()> {
        self.write(&uplink_measurements(event)).await
    }

    async fn handle_join_event(&self, _vars: &Variables, _event: &JoinEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_ack_event(&self, _vars: &Variables, _event: &AckEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_error_event(&self, _vars: &Variables, _event: &ErrorEvent) -> Result<()> {
        Ok(())
    }

    async fn handle_status_event(&self, _vars: &Variables, event: &StatusEvent) -> Result<()> {
        self.write(&status_measurements(event)).await
    }

    async fn handle_location_event(&self, _vars: &Variables, event: &LocationEvent) -> Result<()> {
        self.write(&location_measurements(event)).await
    }

    async fn handle_tx_ack_event(&self, _vars: &Variables, _event: &TxAckEvent) -> Result<()> {
        Ok(())
    }

    fn take_downlink_receiver(&self) -> Option<mpsc::Receiver<DownlinkRequest>> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{http_server, location_event, status_event, uplink_event};

    #[test]
    fn test_uplink_body_is_byte_stable() {
        let body = line_protocol::encode(&uplink_measurements(&uplink_event()));

        let expected = [
            "device_frmpayload_data_count,application_name=weather,dev_eui=0102030405060708,device_name=station-1,f_port=2,site=roof value=3i",
            "device_frmpayload_data_gps_altitude,application_name=weather,dev_eui=0102030405060708,device_name=station-1,f_port=2,site=roof value=12i",
            "device_frmpayload_data_label,application_name=weather,dev_eui=0102030405060708,device_name=station-1,f_port=2,site=roof value=\"north\"",
            "device_frmpayload_data_temperature,application_name=weather,dev_eui=0102030405060708,device_name=station-1,f_port=2,site=roof value=21.500000",
            "device_uplink,application_name=weather,dev_eui=0102030405060708,device_name=station-1,dr=5,frequency=868100000,site=roof f_cnt=10i,rssi=-60i,snr=7.500000,value=1i",
        ];
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 6);
        for line in expected {
            assert!(lines.contains(&line), "missing line: {}\nbody:\n{}", line, body);
        }
        let location = lines
            .iter()
            .find(|l| l.starts_with("device_frmpayload_data_gps_location,"))
            .unwrap();
        assert!(location.contains(" geohash=\"u17"));
        assert!(location.ends_with("latitude=52.300000,longitude=4.900000"));

        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert_eq!(line_protocol::encode(&uplink_measurements(&uplink_event())), body);
    }

    #[test]
    fn test_status_measurements() {
        let body = line_protocol::encode(&status_measurements(&status_event()));
        let names: Vec<&str> = body
            .lines()
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["device_status_battery", "device_status_battery_level", "device_status_margin"]
        );
        assert!(body.contains("device_status_battery_level,"));
        assert!(body.lines().next().unwrap().ends_with(" value=192i"));

        let mut external = status_event();
        external.external_power_source = true;
        let measurements = status_measurements(&external);
        assert_eq!(measurements.len(), 2);
        assert_eq!(measurements[0].values["value"], FieldValue::Integer(0));

        let mut unavailable = status_event();
        unavailable.battery_level_unavailable = true;
        let measurements = status_measurements(&unavailable);
        assert_eq!(measurements.len(), 2);
        assert_eq!(measurements[0].values["value"], FieldValue::Integer(255));
    }

    #[test]
    fn test_location_measurement() {
        let measurements = location_measurements(&location_event());
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].name, "device_location");
        assert_eq!(measurements[0].values["accuracy"], FieldValue::Integer(25));
        assert!(measurements[0].values.contains_key("geohash"));
    }

    #[tokio::test]
    async fn test_v2_write_sends_token() {
        let (base, requests) = http_server::start(204).await;
        let settings = InfluxDbSettings {
            endpoint: base,
            version: InfluxDbVersion::V2,
            organization: "acme".to_string(),
            bucket: "sensors".to_string(),
            token: "t0ken".to_string(),
            ..Default::default()
        };
        let handler = InfluxDbHandler::new(reqwest::Client::new(), settings).unwrap();

        handler
            .handle_status_event(&Variables::new(), &status_event())
            .await
            .unwrap();

        let request = requests.lock().unwrap()[0].clone();
        assert_eq!(
            request.request_line(),
            "POST /api/v2/write?org=acme&bucket=sensors&precision=ns HTTP/1.1"
        );
        assert_eq!(request.header("authorization").as_deref(), Some("Token t0ken"));
        assert_eq!(request.body.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (base, _requests) = http_server::start(400).await;
        let settings = InfluxDbSettings {
            endpoint: base,
            db: "lorix".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            ..Default::default()
        };
        let handler = InfluxDbHandler::new(reqwest::Client::new(), settings).unwrap();

        let err = handler
            .handle_uplink_event(&Variables::new(), &uplink_event())
            .await
            .unwrap_err();

        assert!(matches!(err, IntegrationError::Status { status: 400, .. }));
    }
}
