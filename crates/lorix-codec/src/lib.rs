//! Payload codecs for LoRaWAN application payloads.
//!
//! The [`CodecRegistry`] resolves a [`CodecSelector`] to a concrete codec and converts between
//! FRMPayload bytes and application JSON.

pub mod cayenne_lpp;
mod error;
mod registry;
pub mod sandbox;
pub mod script;

use serde_json::Value;
use std::collections::HashMap;

pub use cayenne_lpp::{CayenneLpp, CayenneLppCodec, TypeTable};
pub use error::{CodecError, Result};
pub use registry::{CodecConfig, CodecRegistry, CodecSelector};
pub use sandbox::{Sandbox, SandboxConfig};
pub use script::ScriptCodec;

/// Device variables made available to codecs.
pub type Variables = HashMap<String, String>;

/// Converts between binary payloads and structured JSON.
pub trait PayloadCodec {
    fn decode(&self, f_port: u8, variables: &Variables, bytes: &[u8]) -> Result<Value>;

    fn encode(&self, f_port: u8, variables: &Variables, object: &Value) -> Result<Vec<u8>>;
}
