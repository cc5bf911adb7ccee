use crate::{IntegrationError, Result};
use serde::{Deserialize, Serialize};

const PRECISIONS: [&str; 6] = ["ns", "u", "ms", "s", "m", "h"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InfluxDbVersion {
    #[default]
    V1,
    V2,
}

/// Per-application InfluxDB settings. `endpoint` is the server base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfluxDbSettings {
    pub endpoint: String,
    pub version: InfluxDbVersion,
    pub db: String,
    pub username: String,
    pub password: String,
    pub retention_policy_name: String,
    pub precision: String,
    pub token: String,
    pub organization: String,
    pub bucket: String,
    pub timeout_ms: Option<u64>,
}

impl Default for InfluxDbSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            version: InfluxDbVersion::V1,
            db: String::new(),
            username: String::new(),
            password: String::new(),
            retention_policy_name: String::new(),
            precision: "ns".to_string(),
            token: String::new(),
            organization: String::new(),
            bucket: String::new(),
            timeout_ms: None,
        }
    }
}

impl InfluxDbSettings {
    pub fn validate(&self) -> Result<()> {
        let endpoint = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            IntegrationError::Config(format!("invalid endpoint '{}': {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(IntegrationError::Config(format!(
                "unsupported endpoint scheme '{}'",
                endpoint.scheme()
            )));
        }
        if !PRECISIONS.contains(&self.precision.as_str()) {
            return Err(IntegrationError::Config(format!(
                "invalid precision '{}', expected one of {}",
                self.precision,
                PRECISIONS.join(", ")
            )));
        }
        match self.version {
            InfluxDbVersion::V1 if self.db.is_empty() => {
                Err(IntegrationError::Config("db is required".to_string()))
            }
            InfluxDbVersion::V2 if self.organization.is_empty() || self.bucket.is_empty() => Err(
                IntegrationError::Config("organization and bucket are required".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Builds the write URL with the query parameters for the configured API version.
    pub fn write_url(&self) -> Result<reqwest::Url> {
        let base = self.endpoint.trim_end_matches('/');
        let (path, params): (&str, Vec<(&str, &str)>) = match self.version {
            InfluxDbVersion::V1 => {
                let mut params = vec![("db", self.db.as_str()), ("precision", self.precision.as_str())];
                if !self.retention_policy_name.is_empty() {
                    params.push(("rp", self.retention_policy_name.as_str()));
                }
                ("/write", params)
            }
            InfluxDbVersion::V2 => {
                let precision = match self.precision.as_str() {
                    "u" => "us",
                    other => other,
                };
                (
                    "/api/v2/write",
                    vec![
                        ("org", self.organization.as_str()),
                        ("bucket", self.bucket.as_str()),
                        ("precision", precision),
                    ],
                )
            }
        };

        reqwest::Url::parse_with_params(&format!("{}{}", base, path), params)
            .map_err(|e| IntegrationError::Config(e.to_string()))
    }
}
