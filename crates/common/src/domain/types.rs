use crate::domain::{DomainError, DomainResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Builds the value from a byte slice of exactly `LEN` bytes.
            pub fn from_slice(bytes: &[u8]) -> DomainResult<Self> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    DomainError::ValidationError(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|e| {
                    DomainError::ValidationError(format!("invalid {} '{}': {}", stringify!($name), s, e))
                })?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// 64-bit extended unique identifier, used for devices and gateways.
    Eui64,
    8
);

hex_id!(
    /// 32-bit per-session device address.
    DevAddr,
    4
);

hex_id!(
    /// 128-bit AES key.
    AesKey,
    16
);

pub type DevEui = Eui64;
pub type GatewayId = Eui64;

/// Serde helper that encodes byte payloads as standard base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => super::serialize(bytes, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui_display_is_lowercase_hex() {
        let eui = Eui64::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xAB, 0xCD]);
        assert_eq!(eui.to_string(), "010203040506abcd");
        assert_eq!("010203040506ABCD".parse::<Eui64>().unwrap(), eui);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = AesKey::from_slice(&[0u8; 15]).unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(msg) if msg.contains("16 bytes")));
    }

    #[test]
    fn test_serde_round_trip() {
        let addr = DevAddr::new([0x01, 0x02, 0x03, 0x04]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01020304\"");
        assert_eq!(serde_json::from_str::<DevAddr>(&json).unwrap(), addr);
    }

    #[test]
    fn test_is_zero() {
        assert!(DevAddr::default().is_zero());
        assert!(!DevAddr::new([0, 0, 0, 1]).is_zero());
    }
}
