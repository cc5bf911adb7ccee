use aes::cipher::generic_array::GenericArray;
use aes_kw::{KekAes128, KekAes192, KekAes256};
use common::domain::{AesKey, DomainError, DomainResult};
use std::collections::HashMap;
use std::fmt;

/// AppSKey as handed over by the network server, optionally wrapped under a named KEK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEnvelope {
    pub kek_label: String,
    pub aes_key: Vec<u8>,
}

/// Key-encryption keys by label, used to unwrap session keys (RFC 3394).
#[derive(Clone, Default)]
pub struct KekStore {
    keks: HashMap<String, Vec<u8>>,
}

impl fmt::Debug for KekStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels: Vec<_> = self.keks.keys().collect();
        labels.sort();
        f.debug_struct("KekStore").field("labels", &labels).finish()
    }
}

impl KekStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a 16, 24 or 32 byte KEK under `label`.
    pub fn with_kek(mut self, label: impl Into<String>, kek: Vec<u8>) -> DomainResult<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(DomainError::ValidationError(
                "kek label must not be empty".to_string(),
            ));
        }
        if !matches!(kek.len(), 16 | 24 | 32) {
            return Err(DomainError::ValidationError(format!(
                "kek '{}' must be 16, 24 or 32 bytes, got {}",
                label,
                kek.len()
            )));
        }
        self.keks.insert(label, kek);
        Ok(self)
    }

    /// Parses a `label=hexkey` list separated by commas. Blank input yields an empty store.
    pub fn parse(list: &str) -> DomainResult<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .try_fold(Self::new(), |store, entry| {
                let (label, key) = entry.split_once('=').ok_or_else(|| {
                    DomainError::ValidationError(format!("kek entry '{}' is not label=hexkey", entry))
                })?;
                let kek = hex::decode(key.trim()).map_err(|e| {
                    DomainError::ValidationError(format!("kek '{}' is not hex: {}", label.trim(), e))
                })?;
                store.with_kek(label.trim(), kek)
            })
    }

    pub fn len(&self) -> usize {
        self.keks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keks.is_empty()
    }

    /// Resolves the plain AppSKey from an envelope.
    pub fn unwrap_key(&self, envelope: &KeyEnvelope) -> DomainResult<AesKey> {
        if envelope.kek_label.is_empty() {
            return AesKey::from_slice(&envelope.aes_key);
        }

        let kek = self.keks.get(&envelope.kek_label).ok_or_else(|| {
            DomainError::KeyUnwrapError(format!("unknown kek label '{}'", envelope.kek_label))
        })?;

        let unwrapped = match kek.len() {
            16 => KekAes128::new(GenericArray::from_slice(kek)).unwrap_vec(&envelope.aes_key),
            24 => KekAes192::new(GenericArray::from_slice(kek)).unwrap_vec(&envelope.aes_key),
            _ => KekAes256::new(GenericArray::from_slice(kek)).unwrap_vec(&envelope.aes_key),
        }
        .map_err(|e| {
            DomainError::KeyUnwrapError(format!(
                "unwrapping with kek '{}' failed: {}",
                envelope.kek_label, e
            ))
        })?;

        AesKey::from_slice(&unwrapped).map_err(|e| DomainError::KeyUnwrapError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_DATA: &str = "00112233445566778899aabbccddeeff";

    fn kek(len: u8) -> Vec<u8> {
        (0..len).collect()
    }

    fn envelope(label: &str, wrapped: &str) -> KeyEnvelope {
        KeyEnvelope {
            kek_label: label.to_string(),
            aes_key: hex::decode(wrapped).unwrap(),
        }
    }

    #[test]
    fn test_plain_key_passes_through() {
        let store = KekStore::new();
        let key = store.unwrap_key(&envelope("", KEY_DATA)).unwrap();
        assert_eq!(key.to_string(), KEY_DATA);
    }

    #[test]
    fn test_plain_key_must_be_16_bytes() {
        let err = KekStore::new()
            .unwrap_key(&envelope("", "0011223344"))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_rfc3394_vectors() {
        let store = KekStore::new()
            .with_kek("k128", kek(16))
            .unwrap()
            .with_kek("k192", kek(24))
            .unwrap()
            .with_kek("k256", kek(32))
            .unwrap();

        for (label, wrapped) in [
            ("k128", "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5"),
            ("k192", "96778b25ae6ca435f92b5b97c050aed2468ab8a17ad84e5d"),
            ("k256", "64e8c3f9ce0f5ba263e9777905818a2a93c8191e7d6e8ae7"),
        ] {
            let key = store.unwrap_key(&envelope(label, wrapped)).unwrap();
            assert_eq!(key.to_string(), KEY_DATA, "kek {}", label);
        }
    }

    #[test]
    fn test_unknown_label() {
        let err = KekStore::new()
            .unwrap_key(&envelope("missing", "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5"))
            .unwrap_err();
        assert!(matches!(err, DomainError::KeyUnwrapError(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_integrity_check_failure() {
        let store = KekStore::new().with_kek("k128", kek(16)).unwrap();
        let err = store
            .unwrap_key(&envelope("k128", "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe6"))
            .unwrap_err();
        assert!(matches!(err, DomainError::KeyUnwrapError(_)));
    }

    #[test]
    fn test_parse_list() {
        let store = KekStore::parse(
            " lora-app-server = 000102030405060708090a0b0c0d0e0f ,js=000102030405060708090a0b0c0d0e0f1011121314151617",
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        assert!(KekStore::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(KekStore::parse("nolabel").is_err());
        assert!(KekStore::parse("a=zz").is_err());
        assert!(KekStore::parse("a=0011").is_err());
        assert!(KekStore::parse("=000102030405060708090a0b0c0d0e0f").is_err());
    }
}
