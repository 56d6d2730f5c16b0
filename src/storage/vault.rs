//! Sealing for credential secrets at rest.
//!
//! With a configured key, secrets are AES-256-GCM encrypted
//! (`aead:` + hex(nonce || ciphertext+tag)); without one they are stored
//! opaque but unencrypted (`plain:` + canonical JSON) in the restricted
//! namespace. Either way, secret documents only ever leave the store
//! through [`SecretVault::open`], which only the tool broker calls.

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::Value;
use std::sync::Arc;

use crate::errors::CoreError;

const PLAIN_PREFIX: &str = "plain:";
const AEAD_PREFIX: &str = "aead:";

#[derive(Clone)]
pub struct SecretVault {
    key: Option<Arc<LessSafeKey>>,
    rng: SystemRandom,
}

impl SecretVault {
    /// Build from an optional hex-encoded 32-byte key.
    pub fn new(key_hex: Option<&str>) -> Result<Self, CoreError> {
        let key = match key_hex {
            None => None,
            Some(hex_str) => {
                let bytes = hex::decode(hex_str).map_err(|_| {
                    CoreError::validation("credential key must be hex-encoded".to_string())
                })?;
                let unbound = UnboundKey::new(&AES_256_GCM, &bytes).map_err(|_| {
                    CoreError::validation("credential key must be 32 bytes".to_string())
                })?;
                Some(Arc::new(LessSafeKey::new(unbound)))
            }
        };
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    pub fn seal(&self, secret: &Value) -> Result<String, CoreError> {
        let plaintext = serde_json::to_vec(secret)
            .map_err(|e| CoreError::internal(format!("serialize secret: {e}")))?;
        match &self.key {
            None => Ok(format!(
                "{PLAIN_PREFIX}{}",
                String::from_utf8(plaintext)
                    .map_err(|e| CoreError::internal(format!("secret encoding: {e}")))?
            )),
            Some(key) => {
                let mut nonce_bytes = [0u8; NONCE_LEN];
                self.rng
                    .fill(&mut nonce_bytes)
                    .map_err(|_| CoreError::internal("nonce generation failed"))?;
                let nonce = Nonce::assume_unique_for_key(nonce_bytes);
                let mut in_out = plaintext;
                key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
                    .map_err(|_| CoreError::internal("secret sealing failed"))?;
                let mut packed = nonce_bytes.to_vec();
                packed.extend_from_slice(&in_out);
                Ok(format!("{AEAD_PREFIX}{}", hex::encode(packed)))
            }
        }
    }

    pub fn open(&self, sealed: &str) -> Result<Value, CoreError> {
        if let Some(raw) = sealed.strip_prefix(PLAIN_PREFIX) {
            return serde_json::from_str(raw)
                .map_err(|e| CoreError::internal(format!("deserialize secret: {e}")));
        }
        let Some(packed_hex) = sealed.strip_prefix(AEAD_PREFIX) else {
            return Err(CoreError::internal("unknown secret encoding"));
        };
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| CoreError::internal("credential key not configured"))?;
        let packed =
            hex::decode(packed_hex).map_err(|_| CoreError::internal("malformed sealed secret"))?;
        if packed.len() <= NONCE_LEN {
            return Err(CoreError::internal("malformed sealed secret"));
        }
        let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CoreError::internal("malformed sealed secret"))?;
        let mut buf = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CoreError::internal("secret unsealing failed"))?;
        serde_json::from_slice(plaintext)
            .map_err(|e| CoreError::internal(format!("deserialize secret: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_round_trip() {
        let vault = SecretVault::new(None).unwrap();
        let secret = json!({"api_key": "sk-test-123"});
        let sealed = vault.seal(&secret).unwrap();
        assert!(sealed.starts_with("plain:"));
        assert_eq!(vault.open(&sealed).unwrap(), secret);
    }

    #[test]
    fn test_aead_round_trip() {
        let key_hex = hex::encode([7u8; 32]);
        let vault = SecretVault::new(Some(&key_hex)).unwrap();
        let secret = json!({"token": "very-secret", "nested": {"password": "p"}});
        let sealed = vault.seal(&secret).unwrap();
        assert!(sealed.starts_with("aead:"));
        assert!(!sealed.contains("very-secret"));
        assert_eq!(vault.open(&sealed).unwrap(), secret);
    }

    #[test]
    fn test_aead_rejects_tampering() {
        let key_hex = hex::encode([9u8; 32]);
        let vault = SecretVault::new(Some(&key_hex)).unwrap();
        let sealed = vault.seal(&json!({"k": "v"})).unwrap();
        let mut tampered = sealed.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(vault.open(&tampered).is_err());
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(SecretVault::new(Some("zz")).is_err());
        assert!(SecretVault::new(Some(&hex::encode([1u8; 16]))).is_err());
    }
}
