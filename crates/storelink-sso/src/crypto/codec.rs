//! Versioned AES-256-GCM codec for secrets at rest.
//!
//! Wire format: `v1:base64(nonce):base64(tag):base64(ciphertext)`, standard
//! base64 with padding. Unknown versions, malformed segments and tag
//! mismatches are errors; the codec never returns unauthenticated plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Current wire format version tag.
pub const CODEC_VERSION: &str = "v1";

/// AES-256-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
const TAG_SIZE: usize = 16;

/// Required key length in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encryption key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(String),

    #[error("Malformed encrypted payload: {0}")]
    Malformed(String),

    #[error("Authentication tag mismatch")]
    IntegrityCheckFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Authenticated encryption for provider configs and tenant secrets.
#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec {
    /// Build a codec from raw key bytes.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidKeyLength` unless `key` is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CodecError> {
        if key.len() != KEY_SIZE {
            return Err(CodecError::InvalidKeyLength(key.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build a codec from 64 hex characters or standard base64.
    pub fn from_key_material(material: &str) -> Result<Self, CodecError> {
        let trimmed = material.trim();
        let bytes = if trimmed.len() == KEY_SIZE * 2
            && trimmed.chars().all(|c| c.is_ascii_hexdigit())
        {
            hex::decode(trimmed).map_err(|e| CodecError::InvalidKeyMaterial(e.to_string()))?
        } else {
            BASE64
                .decode(trimmed)
                .map_err(|e| CodecError::InvalidKeyMaterial(format!("Invalid base64 key: {e}")))?
        };
        Self::new(&bytes)
    }

    /// Encrypt a serializable value.
    ///
    /// Values that serialize to a JSON string are encrypted as their raw text
    /// so `encrypt(&"abc")` and `encrypt_str("abc")` agree.
    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        let json =
            serde_json::to_value(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
        match json {
            serde_json::Value::String(s) => self.encrypt_str(&s),
            other => self.encrypt_str(&other.to_string()),
        }
    }

    /// Encrypt a plaintext string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CodecError::EncryptionFailed(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{CODEC_VERSION}:{}:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt to the recovered plaintext string.
    pub fn decrypt_str(&self, payload: &str) -> Result<String, CodecError> {
        let parts: Vec<&str> = payload.trim().split(':').collect();
        if parts.len() != 4 {
            return Err(CodecError::Malformed(format!(
                "expected 4 segments, got {}",
                parts.len()
            )));
        }
        if parts[0] != CODEC_VERSION {
            return Err(CodecError::UnsupportedVersion(parts[0].to_string()));
        }

        let nonce = decode_segment("nonce", parts[1])?;
        let tag = decode_segment("tag", parts[2])?;
        let ciphertext = decode_segment("ciphertext", parts[3])?;

        if nonce.len() != NONCE_SIZE {
            return Err(CodecError::Malformed(format!(
                "nonce must be {NONCE_SIZE} bytes"
            )));
        }
        if tag.len() != TAG_SIZE {
            return Err(CodecError::Malformed(format!("tag must be {TAG_SIZE} bytes")));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| CodecError::IntegrityCheckFailed)?;

        String::from_utf8(plaintext).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Decrypt and parse.
    ///
    /// The plaintext is parsed as JSON first; if that fails it is offered to
    /// `T` as a JSON string, so `decrypt::<String>` returns the raw text.
    pub fn decrypt<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError> {
        let plaintext = self.decrypt_str(payload)?;
        match serde_json::from_str::<T>(&plaintext) {
            Ok(value) => Ok(value),
            Err(_) => serde_json::from_value(serde_json::Value::String(plaintext))
                .map_err(|e| CodecError::Serialization(e.to_string())),
        }
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(segment)
        .map_err(|e| CodecError::Malformed(format!("invalid {name} encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn codec() -> SecretCodec {
        SecretCodec::new(&[7u8; KEY_SIZE]).unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Credentials {
        access_token: String,
        scopes: Vec<String>,
    }

    #[test]
    fn test_rejects_wrong_key_length() {
        assert!(matches!(
            SecretCodec::new(&[0u8; 16]),
            Err(CodecError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn test_key_material_hex_and_base64() {
        let hex_key = "11".repeat(32);
        assert!(SecretCodec::from_key_material(&hex_key).is_ok());
        let b64_key = BASE64.encode([3u8; 32]);
        assert!(SecretCodec::from_key_material(&b64_key).is_ok());
        assert!(SecretCodec::from_key_material("short").is_err());
    }

    #[test]
    fn test_wire_format() {
        let encrypted = codec().encrypt_str("hello").unwrap();
        let parts: Vec<&str> = encrypted.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "v1");
        assert_eq!(BASE64.decode(parts[1]).unwrap().len(), NONCE_SIZE);
        assert_eq!(BASE64.decode(parts[2]).unwrap().len(), TAG_SIZE);
    }

    #[test]
    fn test_string_round_trip() {
        let c = codec();
        for plaintext in ["", "shpat_123", "with:colons:inside", "ünïcødé", "42"] {
            let encrypted = c.encrypt_str(plaintext).unwrap();
            assert_eq!(c.decrypt::<String>(&encrypted).unwrap(), plaintext);
            assert_eq!(c.decrypt_str(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_struct_round_trip() {
        let c = codec();
        let creds = Credentials {
            access_token: "shpat_abc".into(),
            scopes: vec!["read_customers".into(), "write_customers".into()],
        };
        let encrypted = c.encrypt(&creds).unwrap();
        let decrypted: Credentials = c.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, creds);
    }

    #[test]
    fn test_nonce_is_random() {
        let c = codec();
        assert_ne!(c.encrypt_str("same").unwrap(), c.encrypt_str("same").unwrap());
    }

    fn flip_first_byte(segment: &str) -> String {
        let mut bytes = BASE64.decode(segment).unwrap();
        bytes[0] ^= 0x01;
        BASE64.encode(bytes)
    }

    #[test]
    fn test_tampered_segments_fail() {
        let c = codec();
        let encrypted = c.encrypt_str("top secret value").unwrap();
        let parts: Vec<&str> = encrypted.split(':').collect();

        for index in 1..=3 {
            let mut tampered: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
            tampered[index] = flip_first_byte(parts[index]);
            let result = c.decrypt_str(&tampered.join(":"));
            assert!(
                matches!(result, Err(CodecError::IntegrityCheckFailed)),
                "segment {index} tamper was not detected"
            );
        }
    }

    #[test]
    fn test_unknown_version_fails() {
        let c = codec();
        let encrypted = c.encrypt_str("x").unwrap();
        let v2 = encrypted.replacen("v1:", "v2:", 1);
        assert!(matches!(
            c.decrypt_str(&v2),
            Err(CodecError::UnsupportedVersion(v)) if v == "v2"
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = codec().encrypt_str("x").unwrap();
        let other = SecretCodec::new(&[8u8; KEY_SIZE]).unwrap();
        assert!(other.decrypt_str(&encrypted).is_err());
    }

    #[test]
    fn test_malformed_payload_fails() {
        let c = codec();
        assert!(matches!(
            c.decrypt_str("v1:abc"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            c.decrypt_str("v1:!!:!!:!!"),
            Err(CodecError::Malformed(_))
        ));
    }
}
