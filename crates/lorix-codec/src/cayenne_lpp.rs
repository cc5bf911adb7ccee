//! Cayenne Low Power Payload codec.
//!
//! A payload is a sequence of `(channel, type, value)` records. The structured form groups
//! values by sensor type and keys them by channel, so encoding walks types in table order and
//! channels in ascending order, giving byte-stable output for equal input.

use crate::{CodecError, PayloadCodec, Result, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const TYPE_DIGITAL_INPUT: u8 = 0;
pub const TYPE_DIGITAL_OUTPUT: u8 = 1;
pub const TYPE_ANALOG_INPUT: u8 = 2;
pub const TYPE_ANALOG_OUTPUT: u8 = 3;
pub const TYPE_ILLUMINANCE: u8 = 101;
pub const TYPE_PRESENCE: u8 = 102;
pub const TYPE_TEMPERATURE: u8 = 103;
pub const TYPE_HUMIDITY: u8 = 104;
pub const TYPE_ACCELEROMETER: u8 = 113;
pub const TYPE_BAROMETER: u8 = 115;
pub const TYPE_GYROMETER: u8 = 134;
pub const TYPE_GPS: u8 = 136;

// Extension table
pub const TYPE_COUNTER_INPUT: u8 = 4;
pub const TYPE_BATTERY_VOLTAGE: u8 = 255;

// Value sizes in bytes, excluding the channel and type bytes
pub const SIZE_DIGITAL: usize = 1;
pub const SIZE_ANALOG: usize = 2;
pub const SIZE_ILLUMINANCE: usize = 2;
pub const SIZE_PRESENCE: usize = 1;
pub const SIZE_TEMPERATURE: usize = 2;
pub const SIZE_HUMIDITY: usize = 1;
pub const SIZE_ACCELEROMETER: usize = 6;
pub const SIZE_BAROMETER: usize = 2;
pub const SIZE_GYROMETER: usize = 6;
pub const SIZE_GPS: usize = 9;
pub const SIZE_COUNTER: usize = 2;
pub const SIZE_BATTERY_VOLTAGE: usize = 2;

/// Which record types the codec accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeTable {
    #[default]
    Standard,
    /// Standard types plus counter input (4) and battery voltage (255).
    Extended,
}

impl TypeTable {
    fn data_size(self, type_id: u8) -> Result<usize> {
        match (self, type_id) {
            (_, TYPE_DIGITAL_INPUT | TYPE_DIGITAL_OUTPUT) => Ok(SIZE_DIGITAL),
            (_, TYPE_ANALOG_INPUT | TYPE_ANALOG_OUTPUT) => Ok(SIZE_ANALOG),
            (_, TYPE_ILLUMINANCE) => Ok(SIZE_ILLUMINANCE),
            (_, TYPE_PRESENCE) => Ok(SIZE_PRESENCE),
            (_, TYPE_TEMPERATURE) => Ok(SIZE_TEMPERATURE),
            (_, TYPE_HUMIDITY) => Ok(SIZE_HUMIDITY),
            (_, TYPE_ACCELEROMETER) => Ok(SIZE_ACCELEROMETER),
            (_, TYPE_BAROMETER) => Ok(SIZE_BAROMETER),
            (_, TYPE_GYROMETER) => Ok(SIZE_GYROMETER),
            (_, TYPE_GPS) => Ok(SIZE_GPS),
            (TypeTable::Extended, TYPE_COUNTER_INPUT) => Ok(SIZE_COUNTER),
            (TypeTable::Extended, TYPE_BATTERY_VOLTAGE) => Ok(SIZE_BATTERY_VOLTAGE),
            _ => Err(CodecError::InvalidDataType(type_id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Structured Cayenne LPP payload, keyed per type by channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CayenneLpp {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digital_input: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digital_output: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analog_input: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analog_output: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub illuminance_sensor: BTreeMap<u8, u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub presence_sensor: BTreeMap<u8, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub temperature_sensor: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub humidity_sensor: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accelerometer: BTreeMap<u8, Vector3>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub barometer: BTreeMap<u8, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gyrometer: BTreeMap<u8, Vector3>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gps_location: BTreeMap<u8, GpsLocation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counter_input: BTreeMap<u8, u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub battery_voltage: BTreeMap<u8, f64>,
}

impl CayenneLpp {
    /// Parses a binary payload using the given type table.
    pub fn from_bytes(bytes: &[u8], table: TypeTable) -> Result<Self> {
        let mut lpp = CayenneLpp::default();
        let mut offset = 0;

        while offset < bytes.len() {
            if offset + 2 > bytes.len() {
                return Err(CodecError::InsufficientData {
                    expected: 2,
                    actual: bytes.len() - offset,
                });
            }

            let channel = bytes[offset];
            let type_id = bytes[offset + 1];
            offset += 2;

            let size = table.data_size(type_id)?;
            if offset + size > bytes.len() {
                return Err(CodecError::InsufficientData {
                    expected: size,
                    actual: bytes.len() - offset,
                });
            }

            lpp.insert_record(channel, type_id, &bytes[offset..offset + size])?;
            offset += size;
        }

        Ok(lpp)
    }

    fn insert_record(&mut self, channel: u8, type_id: u8, data: &[u8]) -> Result<()> {
        match type_id {
            TYPE_DIGITAL_INPUT => {
                self.digital_input.insert(channel, data[0]);
            }
            TYPE_DIGITAL_OUTPUT => {
                self.digital_output.insert(channel, data[0]);
            }
            TYPE_ANALOG_INPUT => {
                self.analog_input
                    .insert(channel, f64::from(read_i16_be(data)) / 100.0);
            }
            TYPE_ANALOG_OUTPUT => {
                self.analog_output
                    .insert(channel, f64::from(read_i16_be(data)) / 100.0);
            }
            TYPE_ILLUMINANCE => {
                self.illuminance_sensor.insert(channel, read_u16_be(data));
            }
            TYPE_PRESENCE => {
                self.presence_sensor.insert(channel, data[0]);
            }
            TYPE_TEMPERATURE => {
                self.temperature_sensor
                    .insert(channel, f64::from(read_i16_be(data)) / 10.0);
            }
            TYPE_HUMIDITY => {
                self.humidity_sensor
                    .insert(channel, f64::from(data[0]) / 2.0);
            }
            TYPE_ACCELEROMETER => {
                self.accelerometer.insert(channel, read_vector3(data, 1000.0));
            }
            TYPE_BAROMETER => {
                self.barometer
                    .insert(channel, f64::from(read_u16_be(data)) / 10.0);
            }
            TYPE_GYROMETER => {
                self.gyrometer.insert(channel, read_vector3(data, 100.0));
            }
            TYPE_GPS => {
                self.gps_location.insert(
                    channel,
                    GpsLocation {
                        latitude: f64::from(read_i24_be(&data[0..3])) / 10000.0,
                        longitude: f64::from(read_i24_be(&data[3..6])) / 10000.0,
                        altitude: f64::from(read_i24_be(&data[6..9])) / 100.0,
                    },
                );
            }
            TYPE_COUNTER_INPUT => {
                self.counter_input.insert(channel, read_u16_be(data));
            }
            TYPE_BATTERY_VOLTAGE => {
                self.battery_voltage
                    .insert(channel, f64::from(read_i16_be(data)) / 100.0);
            }
            other => return Err(CodecError::InvalidDataType(other)),
        }
        Ok(())
    }

    /// Serializes the payload. Types are written in table order, channels ascending.
    pub fn to_bytes(&self, table: TypeTable) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        for (channel, value) in &self.digital_input {
            out.extend_from_slice(&[*channel, TYPE_DIGITAL_INPUT, *value]);
        }
        for (channel, value) in &self.digital_output {
            out.extend_from_slice(&[*channel, TYPE_DIGITAL_OUTPUT, *value]);
        }
        for (channel, value) in &self.analog_input {
            out.extend_from_slice(&[*channel, TYPE_ANALOG_INPUT]);
            out.extend_from_slice(&scale_i16("analogInput", *value, 100.0)?.to_be_bytes());
        }
        for (channel, value) in &self.analog_output {
            out.extend_from_slice(&[*channel, TYPE_ANALOG_OUTPUT]);
            out.extend_from_slice(&scale_i16("analogOutput", *value, 100.0)?.to_be_bytes());
        }
        for (channel, value) in &self.illuminance_sensor {
            out.extend_from_slice(&[*channel, TYPE_ILLUMINANCE]);
            out.extend_from_slice(&value.to_be_bytes());
        }
        for (channel, value) in &self.presence_sensor {
            out.extend_from_slice(&[*channel, TYPE_PRESENCE, *value]);
        }
        for (channel, value) in &self.temperature_sensor {
            out.extend_from_slice(&[*channel, TYPE_TEMPERATURE]);
            out.extend_from_slice(&scale_i16("temperatureSensor", *value, 10.0)?.to_be_bytes());
        }
        for (channel, value) in &self.humidity_sensor {
            out.extend_from_slice(&[*channel, TYPE_HUMIDITY, scale_u8("humiditySensor", *value, 2.0)?]);
        }
        for (channel, value) in &self.accelerometer {
            out.extend_from_slice(&[*channel, TYPE_ACCELEROMETER]);
            write_vector3(&mut out, "accelerometer", value, 1000.0)?;
        }
        for (channel, value) in &self.barometer {
            out.extend_from_slice(&[*channel, TYPE_BAROMETER]);
            out.extend_from_slice(&scale_u16("barometer", *value, 10.0)?.to_be_bytes());
        }
        for (channel, value) in &self.gyrometer {
            out.extend_from_slice(&[*channel, TYPE_GYROMETER]);
            write_vector3(&mut out, "gyrometer", value, 100.0)?;
        }
        for (channel, value) in &self.gps_location {
            out.extend_from_slice(&[*channel, TYPE_GPS]);
            out.extend_from_slice(&scale_i24("gpsLocation.latitude", value.latitude, 10000.0)?);
            out.extend_from_slice(&scale_i24("gpsLocation.longitude", value.longitude, 10000.0)?);
            out.extend_from_slice(&scale_i24("gpsLocation.altitude", value.altitude, 100.0)?);
        }

        if table == TypeTable::Standard {
            if !self.counter_input.is_empty() {
                return Err(CodecError::InvalidDataType(TYPE_COUNTER_INPUT));
            }
            if !self.battery_voltage.is_empty() {
                return Err(CodecError::InvalidDataType(TYPE_BATTERY_VOLTAGE));
            }
        }
        for (channel, value) in &self.counter_input {
            out.extend_from_slice(&[*channel, TYPE_COUNTER_INPUT]);
            out.extend_from_slice(&value.to_be_bytes());
        }
        for (channel, value) in &self.battery_voltage {
            out.extend_from_slice(&[*channel, TYPE_BATTERY_VOLTAGE]);
            out.extend_from_slice(&scale_i16("batteryVoltage", *value, 100.0)?.to_be_bytes());
        }

        Ok(out)
    }
}

fn read_i16_be(data: &[u8]) -> i16 {
    i16::from_be_bytes([data[0], data[1]])
}

fn read_u16_be(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

/// Sign-extends a 24-bit big-endian value by placing it in the top of a 32-bit word and
/// shifting back arithmetically.
fn read_i24_be(data: &[u8]) -> i32 {
    let value =
        (i32::from(data[0]) << 24) | (i32::from(data[1]) << 16) | (i32::from(data[2]) << 8);
    value >> 8
}

fn read_vector3(data: &[u8], divisor: f64) -> Vector3 {
    Vector3 {
        x: f64::from(read_i16_be(&data[0..2])) / divisor,
        y: f64::from(read_i16_be(&data[2..4])) / divisor,
        z: f64::from(read_i16_be(&data[4..6])) / divisor,
    }
}

fn scaled(field: &'static str, value: f64, factor: f64, min: f64, max: f64) -> Result<f64> {
    let raw = (value * factor).round();
    if !raw.is_finite() || raw < min || raw > max {
        return Err(CodecError::ValueOutOfRange { field, value });
    }
    Ok(raw)
}

fn scale_u8(field: &'static str, value: f64, factor: f64) -> Result<u8> {
    Ok(scaled(field, value, factor, 0.0, f64::from(u8::MAX))? as u8)
}

fn scale_i16(field: &'static str, value: f64, factor: f64) -> Result<i16> {
    Ok(scaled(field, value, factor, f64::from(i16::MIN), f64::from(i16::MAX))? as i16)
}

fn scale_u16(field: &'static str, value: f64, factor: f64) -> Result<u16> {
    Ok(scaled(field, value, factor, 0.0, f64::from(u16::MAX))? as u16)
}

fn scale_i24(field: &'static str, value: f64, factor: f64) -> Result<[u8; 3]> {
    let raw = scaled(field, value, factor, -8_388_608.0, 8_388_607.0)? as i32;
    let bytes = raw.to_be_bytes();
    Ok([bytes[1], bytes[2], bytes[3]])
}

fn write_vector3(out: &mut Vec<u8>, field: &'static str, v: &Vector3, factor: f64) -> Result<()> {
    out.extend_from_slice(&scale_i16(field, v.x, factor)?.to_be_bytes());
    out.extend_from_slice(&scale_i16(field, v.y, factor)?.to_be_bytes());
    out.extend_from_slice(&scale_i16(field, v.z, factor)?.to_be_bytes());
    Ok(())
}

/// [`PayloadCodec`] adapter over [`CayenneLpp`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CayenneLppCodec {
    table: TypeTable,
}

impl CayenneLppCodec {
    pub fn new(table: TypeTable) -> Self {
        Self { table }
    }
}

impl PayloadCodec for CayenneLppCodec {
    fn decode(&self, _f_port: u8, _variables: &Variables, bytes: &[u8]) -> Result<Value> {
        let lpp = CayenneLpp::from_bytes(bytes, self.table)?;
        Ok(serde_json::to_value(lpp)?)
    }

    fn encode(&self, _f_port: u8, _variables: &Variables, object: &Value) -> Result<Vec<u8>> {
        let lpp: CayenneLpp = serde_json::from_value(object.clone())?;
        lpp.to_bytes(self.table)
    }
}
