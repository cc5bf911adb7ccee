use crate::domain::{
    Application, ApplicationRepository, CodecSettings, DeviceProfile, DeviceProfileRepository,
    DomainError, DomainResult,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use lorix_codec::CodecSelector;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Reads the codec columns shared by `application` and `device_profile`.
///
/// An unrecognized selector is treated as no codec so that a bad admin write does not
/// stall the pipeline.
fn codec_settings(codec: Option<String>, decoder: Option<String>, encoder: Option<String>) -> CodecSettings {
    let selector = codec
        .as_deref()
        .map(|value| {
            value.parse::<CodecSelector>().unwrap_or_else(|e| {
                warn!(codec = %value, error = %e, "unknown payload codec, ignoring");
                CodecSelector::None
            })
        })
        .unwrap_or_default();

    CodecSettings {
        codec: selector,
        decoder_script: decoder.filter(|s| !s.trim().is_empty()),
        encoder_script: encoder.filter(|s| !s.trim().is_empty()),
    }
}

#[derive(Clone)]
pub struct PostgresApplicationRepository {
    client: PostgresClient,
}

impl PostgresApplicationRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApplicationRepository for PostgresApplicationRepository {
    #[instrument(skip(self), fields(application_id = %id))]
    async fn get_application(&self, id: i64) -> DomainResult<Option<Application>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT id, name, payload_codec, payload_decoder_script, payload_encoder_script
                 FROM application
                 WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| Application {
            id: row.get(0),
            name: row.get(1),
            codec: codec_settings(row.get(2), row.get(3), row.get(4)),
        }))
    }
}

#[derive(Clone)]
pub struct PostgresDeviceProfileRepository {
    client: PostgresClient,
}

impl PostgresDeviceProfileRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceProfileRepository for PostgresDeviceProfileRepository {
    #[instrument(skip(self), fields(device_profile_id = %id))]
    async fn get_device_profile(&self, id: &Uuid) -> DomainResult<Option<DeviceProfile>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT id, name, payload_codec, payload_decoder_script, payload_encoder_script
                 FROM device_profile
                 WHERE id = $1",
                &[id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| DeviceProfile {
            id: row.get(0),
            name: row.get(1),
            codec: codec_settings(row.get(2), row.get(3), row.get(4)),
        }))
    }
}
