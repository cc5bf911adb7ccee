use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(i64),

    #[error("Device profile not found: {0}")]
    DeviceProfileNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Key unwrap error: {0}")]
    KeyUnwrapError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Network server error: {0}")]
    NetworkServerError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Validation failures are the caller's fault; everything else is reported as internal.
    pub fn is_validation(&self) -> bool {
        matches!(self, DomainError::ValidationError(_))
    }
}
