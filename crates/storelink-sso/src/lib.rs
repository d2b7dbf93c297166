//! SSO orchestration core for storelink.
//!
//! Authenticates storefront customers against a store's own identity
//! provider (OIDC or SAML) and completes the storefront session either with
//! a multipass token or a one-time password hand-off.
//!
//! # Features
//!
//! - **Providers**: Google, Microsoft, Facebook, Auth0 and generic OIDC;
//!   Okta, Azure AD, OneLogin and Salesforce over SAML
//! - **Redirect state**: single-use, TTL-bound, bound to tenant and provider
//! - **Secrets at rest**: AES-256-GCM (`v1:nonce:tag:ciphertext`)
//! - **ID tokens**: JWKS signature verification with key caching
//! - **SAML**: XML-DSig verification, HMAC-signed RelayState
//! - **Login codes**: emailed six-digit codes via a signed webhook, with an
//!   attempt limit
//! - **Audit**: every attempt ends in exactly one `success` or `failed` event
//!
//! # Example
//!
//! ```rust,ignore
//! use storelink_sso::{sso_router, SsoState};
//!
//! let app = Router::new()
//!     .merge(sso_router())
//!     .with_state(SsoState::new(orchestrator));
//! ```

pub mod crypto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod router;
pub mod services;
pub mod state;

use std::time::Duration;

pub use error::{SsoError, SsoResult};
pub use router::{sso_router, SsoState};
pub use services::AuthOrchestrator;

/// Default timeout for every outbound call (IdP and customer directory).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound HTTP client: explicit timeout, redirects not followed.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .redirect(reqwest::redirect::Policy::none())
        .build()
}
