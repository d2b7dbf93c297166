//! Deterministic storefront passwords.
//!
//! The same (shop domain, email) pair always yields the same password, so a
//! returning customer can be signed in again without a password reset email.
//! The server pepper keeps the output unguessable from public inputs.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::CodecError;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated passwords. Storefronts cap passwords at 40 chars.
pub const PASSWORD_LENGTH: usize = 32;

/// Minimum pepper length in bytes.
const MIN_PEPPER_LEN: usize = 16;

#[derive(Clone)]
pub struct PasswordGenerator {
    mac: HmacSha256,
}

impl std::fmt::Debug for PasswordGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGenerator").finish_non_exhaustive()
    }
}

impl PasswordGenerator {
    pub fn new(pepper: &[u8]) -> Result<Self, CodecError> {
        if pepper.len() < MIN_PEPPER_LEN {
            return Err(CodecError::InvalidKeyMaterial(format!(
                "password pepper must be at least {MIN_PEPPER_LEN} bytes"
            )));
        }
        let mac = HmacSha256::new_from_slice(pepper)
            .map_err(|e| CodecError::InvalidKeyMaterial(e.to_string()))?;
        Ok(Self { mac })
    }

    /// `f(domain, email)`. Pure: case and surrounding whitespace are ignored.
    #[must_use]
    pub fn generate(&self, shop_domain: &str, email: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(shop_domain.trim().to_lowercase().as_bytes());
        mac.update(b":");
        mac.update(email.trim().to_lowercase().as_bytes());
        let encoded = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        encoded[..PASSWORD_LENGTH].to_string()
    }
}
