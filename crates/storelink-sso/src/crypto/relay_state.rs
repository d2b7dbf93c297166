//! Signed SAML RelayState.
//!
//! RelayState is client-controlled, so the tenant/provider pair it carries is
//! bound with an HMAC: `tenantId:providerId:base64url(hmac[..8])`, ids in
//! simple (unhyphenated) hex form. The result is 77 bytes, inside the 80-byte
//! limit of the SAML bindings.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use storelink_core::{ProviderId, TenantId};

use super::{constant_time_eq, CodecError};

type HmacSha256 = Hmac<Sha256>;

/// SAML bindings cap RelayState at 80 bytes.
pub const MAX_RELAY_STATE_LEN: usize = 80;

/// Bytes of HMAC-SHA256 output kept in the value.
const MAC_LEN: usize = 8;

/// Length of a UUID in simple hex form.
const SIMPLE_ID_LEN: usize = 32;

#[derive(Clone)]
pub struct RelayStateSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for RelayStateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStateSigner").finish_non_exhaustive()
    }
}

impl RelayStateSigner {
    pub fn new(secret: &[u8]) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::InvalidKeyMaterial(
                "relay state secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| CodecError::InvalidKeyMaterial(e.to_string()))?;
        Ok(Self { mac })
    }

    fn signature(&self, unsigned: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(unsigned.as_bytes());
        URL_SAFE_NO_PAD.encode(&mac.finalize().into_bytes()[..MAC_LEN])
    }

    /// Produce a RelayState value for the pair.
    #[must_use]
    pub fn sign(&self, tenant_id: TenantId, provider_id: ProviderId) -> String {
        let unsigned = format!(
            "{}:{}",
            tenant_id.as_uuid().simple(),
            provider_id.as_uuid().simple()
        );
        let signature = self.signature(&unsigned);
        format!("{unsigned}:{signature}")
    }

    /// Verify a RelayState value. Returns `None` for unsigned, tampered or
    /// malformed input.
    #[must_use]
    pub fn verify(&self, relay_state: &str) -> Option<(TenantId, ProviderId)> {
        if relay_state.len() > MAX_RELAY_STATE_LEN {
            return None;
        }
        let mut parts = relay_state.splitn(3, ':');
        let tenant = parts.next()?;
        let provider = parts.next()?;
        let signature = parts.next()?;
        if tenant.len() != SIMPLE_ID_LEN || provider.len() != SIMPLE_ID_LEN {
            return None;
        }

        let expected = self.signature(&format!("{tenant}:{provider}"));
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return None;
        }

        Some((tenant.parse().ok()?, provider.parse().ok()?))
    }
}
