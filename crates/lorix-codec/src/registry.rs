use crate::cayenne_lpp::{CayenneLppCodec, TypeTable};
use crate::sandbox::{Sandbox, SandboxConfig};
use crate::script::ScriptCodec;
use crate::{CodecError, PayloadCodec, Result, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named payload codec configured on an application or device profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodecSelector {
    #[default]
    None,
    CayenneLpp,
    CustomJs,
}

impl CodecSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecSelector::None => "NONE",
            CodecSelector::CayenneLpp => "CAYENNE_LPP",
            CodecSelector::CustomJs => "CUSTOM_JS",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, CodecSelector::None)
    }
}

impl fmt::Display for CodecSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "NONE" => Ok(CodecSelector::None),
            "CAYENNE_LPP" => Ok(CodecSelector::CayenneLpp),
            "CUSTOM_JS" => Ok(CodecSelector::CustomJs),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub script_deadline: Duration,
    pub cayenne_extensions: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            script_deadline: Duration::from_millis(10),
            cayenne_extensions: false,
        }
    }
}

/// Dispatches decode/encode calls to the codec named by a [`CodecSelector`].
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    cayenne: CayenneLppCodec,
    sandbox: Sandbox,
}

impl CodecRegistry {
    pub fn new(config: CodecConfig) -> Self {
        let table = if config.cayenne_extensions {
            TypeTable::Extended
        } else {
            TypeTable::Standard
        };
        Self {
            cayenne: CayenneLppCodec::new(table),
            sandbox: Sandbox::new(SandboxConfig {
                deadline: config.script_deadline,
                ..Default::default()
            }),
        }
    }

    /// Decodes `bytes` into JSON. Returns `None` when no codec is configured.
    pub fn decode(
        &self,
        selector: CodecSelector,
        f_port: u8,
        variables: &Variables,
        script: Option<&str>,
        bytes: &[u8],
    ) -> Result<Option<Value>> {
        match selector {
            CodecSelector::None => Ok(None),
            CodecSelector::CayenneLpp => self.cayenne.decode(f_port, variables, bytes).map(Some),
            CodecSelector::CustomJs => {
                let script = script
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(CodecError::MissingScript("decode"))?;
                ScriptCodec::new(&self.sandbox, script)
                    .decode(f_port, variables, bytes)
                    .map(Some)
            }
        }
    }

    /// Encodes a JSON object into bytes.
    pub fn encode(
        &self,
        selector: CodecSelector,
        f_port: u8,
        variables: &Variables,
        script: Option<&str>,
        object: &Value,
    ) -> Result<Vec<u8>> {
        match selector {
            CodecSelector::None => Err(CodecError::NotConfigured),
            CodecSelector::CayenneLpp => self.cayenne.encode(f_port, variables, object),
            CodecSelector::CustomJs => {
                let script = script
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(CodecError::MissingScript("encode"))?;
                ScriptCodec::new(&self.sandbox, script).encode(f_port, variables, object)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_none_selector_yields_no_object() {
        let registry = CodecRegistry::default();
        let result = registry
            .decode(CodecSelector::None, 1, &Variables::new(), None, &[1, 2, 3])
            .unwrap();
        assert!(result.is_none());
        assert!(matches!(
            registry.encode(CodecSelector::None, 1, &Variables::new(), None, &json!({})),
            Err(CodecError::NotConfigured)
        ));
    }

    #[test]
    fn test_custom_js_requires_script() {
        let registry = CodecRegistry::default();
        let err = registry
            .decode(CodecSelector::CustomJs, 1, &Variables::new(), Some("  "), &[])
            .unwrap_err();
        assert!(matches!(err, CodecError::MissingScript("decode")));
    }

    #[test]
    fn test_cayenne_extensions_follow_config() {
        let payload = [0x01, 0x04, 0x00, 0x05];

        let standard = CodecRegistry::default();
        assert!(standard
            .decode(CodecSelector::CayenneLpp, 1, &Variables::new(), None, &payload)
            .is_err());

        let extended = CodecRegistry::new(CodecConfig {
            cayenne_extensions: true,
            ..Default::default()
        });
        let object = extended
            .decode(CodecSelector::CayenneLpp, 1, &Variables::new(), None, &payload)
            .unwrap();
        assert_eq!(object, Some(json!({"counterInput": {"1": 5}})));
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("CAYENNE_LPP".parse::<CodecSelector>().unwrap(), CodecSelector::CayenneLpp);
        assert_eq!("".parse::<CodecSelector>().unwrap(), CodecSelector::None);
        assert!("PROTOBUF".parse::<CodecSelector>().is_err());
        assert_eq!(
            serde_json::to_value(CodecSelector::CustomJs).unwrap(),
            json!("CUSTOM_JS")
        );
    }
}
