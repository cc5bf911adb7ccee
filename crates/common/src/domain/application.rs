use crate::domain::DomainResult;
use async_trait::async_trait;
use lorix_codec::CodecSelector;
use uuid::Uuid;

/// Payload codec configuration shared by applications and device profiles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecSettings {
    pub codec: CodecSelector,
    pub decoder_script: Option<String>,
    pub encoder_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub codec: CodecSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub id: Uuid,
    pub name: String,
    pub codec: CodecSettings,
}

/// Picks the codec for a device: a configured device-profile codec shadows the application's.
pub fn effective_codec<'a>(
    application: &'a Application,
    device_profile: Option<&'a DeviceProfile>,
) -> &'a CodecSettings {
    match device_profile {
        Some(profile) if !profile.codec.codec.is_none() => &profile.codec,
        _ => &application.codec,
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_application(&self, id: i64) -> DomainResult<Option<Application>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceProfileRepository: Send + Sync {
    async fn get_device_profile(&self, id: &Uuid) -> DomainResult<Option<DeviceProfile>>;
}
