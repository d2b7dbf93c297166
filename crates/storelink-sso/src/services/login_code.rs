//! Login code delivery.
//!
//! Codes are handed to a tenant-agnostic webhook that sends the email. The
//! body is signed with HMAC-SHA256 over `{timestamp}.{body}` so the
//! receiver can reject forged or replayed deliveries.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use storelink_core::TenantId;
use thiserror::Error;
use tracing::instrument;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Storelink-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Storelink-Timestamp";

/// Shortest accepted webhook signing secret, in bytes.
pub const MIN_WEBHOOK_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid webhook secret: {0}")]
    InvalidSecret(String),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("webhook returned HTTP {0}")]
    Rejected(u16),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One code to send to one customer.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCodeMessage {
    pub tenant_id: TenantId,
    pub shop_domain: String,
    pub email: String,
    pub code: String,
    /// Seconds until the code expires.
    pub expires_in: u64,
}

impl std::fmt::Debug for LoginCodeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCodeMessage")
            .field("tenant_id", &self.tenant_id)
            .field("shop_domain", &self.shop_domain)
            .field("email", &self.email)
            .field("code", &"[redacted]")
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, message: &LoginCodeMessage) -> Result<(), DeliveryError>;
}

/// Hex HMAC-SHA256 of `{timestamp}.{body}`.
fn sign_payload(mac: &HmacSha256, timestamp: i64, body: &[u8]) -> String {
    let mut mac = mac.clone();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Posts each message as JSON to a fixed URL.
pub struct WebhookCodeDelivery {
    http: reqwest::Client,
    url: String,
    mac: HmacSha256,
}

impl WebhookCodeDelivery {
    /// `http` should carry the outbound timeout.
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        secret: &[u8],
    ) -> Result<Self, DeliveryError> {
        if secret.len() < MIN_WEBHOOK_SECRET_LEN {
            return Err(DeliveryError::InvalidSecret(format!(
                "must be at least {MIN_WEBHOOK_SECRET_LEN} bytes"
            )));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| DeliveryError::InvalidSecret(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            mac,
        })
    }
}

#[async_trait]
impl CodeDelivery for WebhookCodeDelivery {
    #[instrument(skip(self, message), fields(tenant_id = %message.tenant_id))]
    async fn deliver(&self, message: &LoginCodeMessage) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(message)?;
        let timestamp = Utc::now().timestamp();
        let signature = sign_payload(&self.mac, timestamp, &body);

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, format!("sha256={signature}"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
