//! Storefront multipass tokens.
//!
//! The shared secret is hashed with SHA-256; the first 16 bytes key
//! AES-128-CBC and the last 16 bytes key the HMAC-SHA256 signature.
//! Token = urlsafe_base64(iv || ciphertext || signature).

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use openssl::symm::{encrypt, Cipher};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::CodecError;

type HmacSha256 = Hmac<Sha256>;

const IV_SIZE: usize = 16;

/// Customer data embedded in a multipass token.
#[derive(Debug, Clone, Serialize)]
pub struct MultipassPayload {
    pub email: String,
    /// ISO 8601; the storefront rejects tokens older than a few minutes.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

impl MultipassPayload {
    #[must_use]
    pub fn new(email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            first_name: None,
            last_name: None,
            return_to: None,
        }
    }
}

#[derive(Clone)]
pub struct MultipassEncoder {
    encryption_key: [u8; 16],
    signing_key: [u8; 16],
}

impl std::fmt::Debug for MultipassEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipassEncoder").finish_non_exhaustive()
    }
}

impl MultipassEncoder {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut encryption_key = [0u8; 16];
        let mut signing_key = [0u8; 16];
        encryption_key.copy_from_slice(&digest[..16]);
        signing_key.copy_from_slice(&digest[16..]);
        Self {
            encryption_key,
            signing_key,
        }
    }

    /// Encrypt and sign a payload.
    pub fn encode(&self, payload: &MultipassPayload) -> Result<String, CodecError> {
        let json =
            serde_json::to_vec(payload).map_err(|e| CodecError::Serialization(e.to_string()))?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = encrypt(Cipher::aes_128_cbc(), &self.encryption_key, Some(&iv), &json)
            .map_err(|e| CodecError::EncryptionFailed(e.to_string()))?;

        let mut token = Vec::with_capacity(IV_SIZE + ciphertext.len() + 32);
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| CodecError::EncryptionFailed(e.to_string()))?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(token))
    }

    /// Storefront login URL that consumes the token.
    pub fn login_url(
        &self,
        shop_domain: &str,
        payload: &MultipassPayload,
    ) -> Result<String, CodecError> {
        let token = self.encode(payload)?;
        Ok(format!(
            "https://{}/account/login/multipass/{token}",
            shop_domain.trim_end_matches('/')
        ))
    }
}
