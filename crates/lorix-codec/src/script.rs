use crate::sandbox::{to_json, Sandbox};
use crate::{CodecError, PayloadCodec, Result, Variables};
use rquickjs::{Ctx, Type, Value as JsValue};
use serde_json::Value;

pub const DECODE_FUNCTION: &str = "Decode";
pub const ENCODE_FUNCTION: &str = "Encode";

/// Codec backed by user-supplied `Decode(fPort, bytes, variables)` and
/// `Encode(fPort, object, variables)` functions.
pub struct ScriptCodec<'a> {
    sandbox: &'a Sandbox,
    script: &'a str,
}

impl<'a> ScriptCodec<'a> {
    pub fn new(sandbox: &'a Sandbox, script: &'a str) -> Self {
        Self { sandbox, script }
    }
}

impl PayloadCodec for ScriptCodec<'_> {
    fn decode(&self, f_port: u8, variables: &Variables, bytes: &[u8]) -> Result<Value> {
        let args = [
            Value::from(f_port),
            Value::from(bytes.to_vec()),
            serde_json::to_value(variables)?,
        ];
        self.sandbox
            .call(self.script, DECODE_FUNCTION, args, normalize_object)
    }

    fn encode(&self, f_port: u8, variables: &Variables, object: &Value) -> Result<Vec<u8>> {
        let args = [
            Value::from(f_port),
            object.clone(),
            serde_json::to_value(variables)?,
        ];
        self.sandbox
            .call(self.script, ENCODE_FUNCTION, args, normalize_bytes)
    }
}

fn normalize_object<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> Result<Value> {
    if value.type_of() != Type::Object {
        return Err(CodecError::NotAnObject);
    }
    to_json(ctx, value)
}

fn normalize_bytes<'js>(_ctx: &Ctx<'js>, value: JsValue<'js>) -> Result<Vec<u8>> {
    let type_name = value.type_name();
    let array = value
        .into_array()
        .ok_or_else(|| CodecError::NotAnArray(type_name.to_string()))?;

    let mut bytes = Vec::with_capacity(array.len());
    for index in 0..array.len() {
        let element: JsValue = array
            .get(index)
            .map_err(|e| CodecError::Script(e.to_string()))?;
        let number = element
            .as_number()
            .ok_or_else(|| CodecError::NotANumber(element.type_name().to_string()))?;
        bytes.push(to_byte(number)?);
    }
    Ok(bytes)
}

fn to_byte(number: f64) -> Result<u8> {
    if !number.is_finite() || number.fract() != 0.0 {
        return Err(CodecError::NotAnInteger(number.to_string()));
    }
    if !(0.0..=255.0).contains(&number) {
        return Err(CodecError::OutOfByteRange(number.to_string()));
    }
    Ok(number as u8)
}
