//! Values kept in the ephemeral store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storelink_core::{ProviderId, TenantId};

use crate::models::ProviderType;

/// Redirect state bound to one login attempt.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectState {
    pub tenant_id: TenantId,
    pub provider_id: ProviderId,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub return_to: Option<String>,
    #[serde(default)]
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
}

impl RedirectState {
    #[must_use]
    pub fn new(tenant_id: TenantId, provider_id: ProviderId, provider_type: ProviderType) -> Self {
        Self {
            tenant_id,
            provider_id,
            provider_type,
            nonce: None,
            code_verifier: None,
            return_to: None,
            test_mode: false,
            created_at: Utc::now(),
        }
    }

    /// True when the state was issued for this tenant and provider.
    #[must_use]
    pub fn is_bound_to(&self, tenant_id: TenantId, provider_id: ProviderId) -> bool {
        self.tenant_id == tenant_id && self.provider_id == provider_id
    }
}

impl std::fmt::Debug for RedirectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectState")
            .field("tenant_id", &self.tenant_id)
            .field("provider_id", &self.provider_id)
            .field("provider_type", &self.provider_type)
            .field("return_to", &self.return_to)
            .field("test_mode", &self.test_mode)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Storefront credentials handed to the auto-fill page exactly once.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHandoff {
    pub email: String,
    pub password: String,
    pub return_to: String,
}

impl std::fmt::Debug for CredentialHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHandoff")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("return_to", &self.return_to)
            .finish()
    }
}

/// Stored one-time code. `code` is `None` once the pair is locked out.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeCode {
    pub code: Option<String>,
    #[serde(default)]
    pub failed_attempts: u32,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for OneTimeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeCode")
            .field("code", &self.code.as_ref().map(|_| "[redacted]"))
            .field("failed_attempts", &self.failed_attempts)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of checking a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Verified,
    /// Wrong code; `remaining` further guesses are allowed.
    Rejected { remaining: u32 },
    /// Too many wrong guesses; no code is accepted until the window ends.
    LockedOut,
    /// No code was issued, or it expired or was already used.
    Expired,
}
