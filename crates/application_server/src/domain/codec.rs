use common::domain::{CodecSettings, DomainError, DomainResult};
use lorix_codec::{CodecError, CodecRegistry, Variables};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a codec call that was not cancelled.
pub type CodecOutcome<T> = Result<T, CodecError>;

/// Decodes on the blocking pool, racing `cancel`.
///
/// The outer error is reserved for cancellation and join failures; codec failures come back
/// in the inner result so the caller can report them as events.
pub async fn decode_payload(
    codecs: Arc<CodecRegistry>,
    settings: &CodecSettings,
    f_port: u8,
    variables: Variables,
    data: Vec<u8>,
    cancel: &CancellationToken,
) -> DomainResult<CodecOutcome<Option<Value>>> {
    let selector = settings.codec;
    let script = settings.decoder_script.clone();
    let task = tokio::task::spawn_blocking(move || {
        codecs.decode(selector, f_port, &variables, script.as_deref(), &data)
    });

    tokio::select! {
        joined = task => joined.map_err(|e| DomainError::CodecError(format!("decoder task failed: {}", e))),
        _ = cancel.cancelled() => Err(DomainError::Cancelled),
    }
}

/// Encodes on the blocking pool, racing `cancel`.
pub async fn encode_payload(
    codecs: Arc<CodecRegistry>,
    settings: &CodecSettings,
    f_port: u8,
    variables: Variables,
    object: Value,
    cancel: &CancellationToken,
) -> DomainResult<CodecOutcome<Vec<u8>>> {
    let selector = settings.codec;
    let script = settings.encoder_script.clone();
    let task = tokio::task::spawn_blocking(move || {
        codecs.encode(selector, f_port, &variables, script.as_deref(), &object)
    });

    tokio::select! {
        joined = task => joined.map_err(|e| DomainError::CodecError(format!("encoder task failed: {}", e))),
        _ = cancel.cancelled() => Err(DomainError::Cancelled),
    }
}
