use thiserror::Error;

pub type Result<T> = std::result::Result<T, IntegrationError>;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("invalid integration configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Unsupported(String),
}

impl IntegrationError {
    pub fn transport(error: impl std::fmt::Display) -> Self {
        IntegrationError::Transport(error.to_string())
    }
}

impl From<reqwest::Error> for IntegrationError {
    fn from(error: reqwest::Error) -> Self {
        IntegrationError::Transport(error.to_string())
    }
}

impl From<IntegrationError> for common::domain::DomainError {
    fn from(error: IntegrationError) -> Self {
        match error {
            IntegrationError::Config(msg) => common::domain::DomainError::ValidationError(msg),
            other => common::domain::DomainError::RepositoryError(other.into()),
        }
    }
}
