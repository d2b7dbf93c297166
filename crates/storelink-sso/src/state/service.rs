//! Typed, namespaced access to the ephemeral store.

use chrono::Utc;
use rand::{rngs::OsRng, Rng};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storelink_core::TenantId;

use super::store::{EphemeralStore, StateError};
use super::types::{CredentialHandoff, OneTimeCode, OtpCheck, RedirectState};
use crate::crypto::{constant_time_eq, generate_token};

/// Redirect state lifetime.
pub const REDIRECT_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Credential hand-off lifetime.
pub const HANDOFF_TTL: Duration = Duration::from_secs(120);

/// One-time code lifetime.
pub const OTP_TTL: Duration = Duration::from_secs(10 * 60);

/// Wrong guesses allowed per (tenant, email) before codes are locked out
/// for the rest of the window.
pub const MAX_OTP_ATTEMPTS: u32 = 5;

const STATE_PREFIX: &str = "sso:state:";
const HANDOFF_PREFIX: &str = "sso:handoff:";
const OTP_PREFIX: &str = "sso:otp:";

/// Random bytes in state and hand-off tokens.
const TOKEN_BYTES: usize = 32;

#[derive(Clone)]
pub struct StateService {
    store: Arc<dyn EphemeralStore>,
}

impl StateService {
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    async fn put<T: Serialize>(
        &self,
        key: String,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StateError> {
        let json = serde_json::to_string(value)?;
        self.store.set(&key, json, ttl).await
    }

    async fn take<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StateError> {
        match self.store.consume(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store redirect state under a fresh random token and return the token.
    pub async fn create_redirect_state(&self, state: &RedirectState) -> Result<String, StateError> {
        let token = generate_token(TOKEN_BYTES);
        self.store_redirect_state(&token, state).await?;
        Ok(token)
    }

    /// Store redirect state under a caller-chosen key (SAML request id).
    pub async fn store_redirect_state(
        &self,
        key: &str,
        state: &RedirectState,
    ) -> Result<(), StateError> {
        self.put(format!("{STATE_PREFIX}{key}"), state, REDIRECT_STATE_TTL)
            .await
    }

    pub async fn peek_redirect_state(&self, key: &str) -> Result<Option<RedirectState>, StateError> {
        match self.store.get(&format!("{STATE_PREFIX}{key}")).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Single-use read of redirect state.
    pub async fn consume_redirect_state(
        &self,
        key: &str,
    ) -> Result<Option<RedirectState>, StateError> {
        self.take(format!("{STATE_PREFIX}{key}")).await
    }

    /// Write credentials under a fresh token for a single retrieval.
    pub async fn create_handoff(&self, handoff: &CredentialHandoff) -> Result<String, StateError> {
        let token = generate_token(TOKEN_BYTES);
        self.put(format!("{HANDOFF_PREFIX}{token}"), handoff, HANDOFF_TTL)
            .await?;
        Ok(token)
    }

    pub async fn consume_handoff(
        &self,
        token: &str,
    ) -> Result<Option<CredentialHandoff>, StateError> {
        self.take(format!("{HANDOFF_PREFIX}{token}")).await
    }

    fn otp_key(tenant_id: TenantId, email: &str) -> String {
        format!("{OTP_PREFIX}{tenant_id}:{}", email.trim().to_lowercase())
    }

    /// Issue a six-digit code for (tenant, email), replacing any earlier one.
    ///
    /// Failed attempts carry over to the new code. Returns `None` while the
    /// pair is locked out.
    pub async fn issue_otp(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> Result<Option<String>, StateError> {
        let key = Self::otp_key(tenant_id, email);
        let failed_attempts = match self.store.get(&key).await? {
            Some(json) => serde_json::from_str::<OneTimeCode>(&json)?.failed_attempts,
            None => 0,
        };
        if failed_attempts >= MAX_OTP_ATTEMPTS {
            return Ok(None);
        }

        let code = format!("{:06}", OsRng.gen_range(0..1_000_000u32));
        let entry = OneTimeCode {
            code: Some(code.clone()),
            failed_attempts,
            expires_at: Utc::now() + chrono::Duration::seconds(OTP_TTL.as_secs() as i64),
        };
        self.put(key, &entry, OTP_TTL).await?;
        Ok(Some(code))
    }

    /// Check a code and burn it on success.
    ///
    /// The entry is consumed before comparing, so of two concurrent
    /// submissions at most one sees it. A wrong guess writes it back with
    /// one more failed attempt; the last allowed failure writes back a
    /// lockout marker with no code.
    pub async fn verify_otp(
        &self,
        tenant_id: TenantId,
        email: &str,
        code: &str,
    ) -> Result<OtpCheck, StateError> {
        let key = Self::otp_key(tenant_id, email);
        let Some(mut entry) = self.take::<OneTimeCode>(key.clone()).await? else {
            return Ok(OtpCheck::Expired);
        };

        let Some(expected) = entry.code.take() else {
            self.restore_otp(key, &entry).await?;
            return Ok(OtpCheck::LockedOut);
        };
        if constant_time_eq(expected.as_bytes(), code.trim().as_bytes()) {
            return Ok(OtpCheck::Verified);
        }

        entry.failed_attempts += 1;
        let remaining = MAX_OTP_ATTEMPTS.saturating_sub(entry.failed_attempts);
        if remaining > 0 {
            entry.code = Some(expected);
        } else {
            tracing::warn!(%tenant_id, "One-time code locked out after repeated failures");
        }
        self.restore_otp(key, &entry).await?;
        Ok(OtpCheck::Rejected { remaining })
    }

    /// Write an OTP entry back for the rest of its original lifetime.
    async fn restore_otp(&self, key: String, entry: &OneTimeCode) -> Result<(), StateError> {
        match (entry.expires_at - Utc::now()).to_std() {
            Ok(ttl) if !ttl.is_zero() => self.put(key, entry, ttl).await,
            _ => Ok(()),
        }
    }
}
