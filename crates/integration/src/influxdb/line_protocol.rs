//! InfluxDB line-protocol serialisation.
//!
//! Output is deterministic: tags and values are kept in sorted maps and the encoded lines are
//! sorted before joining.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::Float(v) => write!(f, "{:.6}", v),
            FieldValue::String(v) => {
                let v = without_line_breaks(v);
                write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
            }
            FieldValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&serde_json::Number> for FieldValue {
    fn from(number: &serde_json::Number) -> Self {
        match number.as_i64() {
            Some(v) => FieldValue::Integer(v),
            None => FieldValue::Float(number.as_f64().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<String, FieldValue>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            tags,
            values: BTreeMap::new(),
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn to_line(&self) -> String {
        let mut line = escape(&self.name, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }

        let fields: Vec<String> = self
            .values
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line
    }
}

/// Line breaks terminate a record and cannot be escaped, so they become spaces.
fn without_line_breaks(input: &str) -> String {
    input.replace(['\r', '\n'], " ")
}

fn escape(input: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in without_line_breaks(input).chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Encodes measurements into a request body. Measurements without values are dropped.
pub fn encode(measurements: &[Measurement]) -> String {
    let mut lines: Vec<String> = measurements
        .iter()
        .filter(|m| !m.values.is_empty())
        .map(Measurement::to_line)
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Expands a decoded object into one measurement per leaf under `prefix`.
///
/// Maps carrying numeric `latitude` and `longitude` keys produce a single `{prefix}_location`
/// measurement with a geohash, and those two keys are not expanded as scalars.
pub fn expand_object(
    prefix: &str,
    value: &Value,
    tags: &BTreeMap<String, String>,
    out: &mut Vec<Measurement>,
) {
    match value {
        Value::Object(map) => {
            let position = map
                .get("latitude")
                .and_then(Value::as_f64)
                .zip(map.get("longitude").and_then(Value::as_f64));

            if let Some((latitude, longitude)) = position {
                out.push(location_measurement(
                    format!("{}_location", prefix),
                    tags.clone(),
                    latitude,
                    longitude,
                ));
            }

            for (key, child) in map {
                if position.is_some() && (key == "latitude" || key == "longitude") {
                    continue;
                }
                expand_object(&format!("{}_{}", prefix, key), child, tags, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                expand_object(&format!("{}_{}", prefix, index), child, tags, out);
            }
        }
        Value::Number(number) => {
            out.push(Measurement::new(prefix, tags.clone()).value("value", number.into()));
        }
        Value::String(s) => {
            out.push(Measurement::new(prefix, tags.clone()).value("value", FieldValue::String(s.clone())));
        }
        Value::Bool(b) => {
            out.push(Measurement::new(prefix, tags.clone()).value("value", FieldValue::Bool(*b)));
        }
        Value::Null => {}
    }
}

/// Builds a measurement carrying latitude, longitude and, when the position is valid, its
/// 12-character geohash.
pub fn location_measurement(
    name: String,
    tags: BTreeMap<String, String>,
    latitude: f64,
    longitude: f64,
) -> Measurement {
    let mut measurement = Measurement::new(name, tags)
        .value("latitude", FieldValue::Float(latitude))
        .value("longitude", FieldValue::Float(longitude));
    if let Ok(hash) = geohash::encode(geohash::Coord { x: longitude, y: latitude }, 12) {
        measurement = measurement.value("geohash", FieldValue::String(hash));
    }
    measurement
}
