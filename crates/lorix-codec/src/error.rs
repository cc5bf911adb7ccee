use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid data type: {0}")]
    InvalidDataType(u8),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("value out of range for {field}: {value}")]
    ValueOutOfRange { field: &'static str, value: f64 },

    #[error("no codec configured")]
    NotConfigured,

    #[error("no script configured for {0}")]
    MissingScript(&'static str),

    #[error("{0} function is not defined")]
    MissingFunction(String),

    #[error("function must return object")]
    NotAnObject,

    #[error("function must return array, got: {0}")]
    NotAnArray(String),

    #[error("value must be a number, got: {0}")]
    NotANumber(String),

    #[error("value must be an integer, got: {0}")]
    NotAnInteger(String),

    #[error("value must be in byte range (0–255), got: {0}")]
    OutOfByteRange(String),

    #[error("execution timeout")]
    Timeout,

    #[error("script error: {0}")]
    Script(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
