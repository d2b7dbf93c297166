//! Identity provider abstraction.
//!
//! Every provider is one variant of [`Provider`]; the registry maps provider
//! type tokens to constructors. The orchestrator only sees the
//! [`IdentityProvider`] capability set.

pub mod discovery;
pub mod id_token;
pub mod oidc;
pub mod pkce;
pub mod registry;
pub mod saml;
pub mod saml_response;

use async_trait::async_trait;
use storelink_core::{ProviderId, TenantId};

use crate::crypto::RelayStateSigner;
use crate::error::SsoResult;
use crate::models::{
    CallbackParams, CallbackResult, InitiateRequest, InitiateResult, Protocol, ProviderType,
};
use crate::state::{RedirectState, StateService};

pub use discovery::DiscoveryService;
pub use id_token::{IdTokenVerification, IdTokenVerifier};
pub use oidc::OidcProvider;
pub use registry::{ProviderDependencies, ProviderRegistration, ProviderRegistry};
pub use saml::SamlProvider;

/// Capability set implemented by every identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the IdP redirect. Any state needed by the callback is persisted
    /// before this returns.
    async fn initiate(&self, request: &InitiateRequest) -> SsoResult<InitiateResult>;

    /// Validate the IdP response and normalize the identity.
    ///
    /// `pre_consumed` is the redirect state the HTTP layer already consumed;
    /// when `None` the provider consumes it itself.
    async fn handle_callback(
        &self,
        params: &CallbackParams,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<CallbackResult>;

    /// True when every required config field is present.
    fn validate_config(&self) -> bool;

    fn required_config_fields(&self) -> &'static [&'static str];

    fn default_scopes(&self) -> Vec<String>;

    fn provider_type(&self) -> ProviderType;

    fn protocol(&self) -> Protocol;
}

/// Per-instance context shared by all provider variants.
#[derive(Clone)]
pub struct ProviderContext {
    pub tenant_id: TenantId,
    pub provider_id: ProviderId,
    pub provider_type: ProviderType,
    /// Exact callback URL registered with the IdP.
    pub callback_url: String,
    pub state: StateService,
    pub http: reqwest::Client,
    pub discovery: DiscoveryService,
    pub id_tokens: IdTokenVerifier,
    pub relay_state: RelayStateSigner,
}

/// Closed set of provider variants.
pub enum Provider {
    Oidc(OidcProvider),
    Saml(SamlProvider),
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("protocol", &self.protocol())
            .field("provider_type", &self.provider_type())
            .finish()
    }
}

#[async_trait]
impl IdentityProvider for Provider {
    async fn initiate(&self, request: &InitiateRequest) -> SsoResult<InitiateResult> {
        match self {
            Self::Oidc(p) => p.initiate(request).await,
            Self::Saml(p) => p.initiate(request).await,
        }
    }

    async fn handle_callback(
        &self,
        params: &CallbackParams,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<CallbackResult> {
        match self {
            Self::Oidc(p) => p.handle_callback(params, pre_consumed).await,
            Self::Saml(p) => p.handle_callback(params, pre_consumed).await,
        }
    }

    fn validate_config(&self) -> bool {
        match self {
            Self::Oidc(p) => p.validate_config(),
            Self::Saml(p) => p.validate_config(),
        }
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Oidc(p) => p.required_config_fields(),
            Self::Saml(p) => p.required_config_fields(),
        }
    }

    fn default_scopes(&self) -> Vec<String> {
        match self {
            Self::Oidc(p) => p.default_scopes(),
            Self::Saml(p) => p.default_scopes(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        match self {
            Self::Oidc(p) => p.provider_type(),
            Self::Saml(p) => p.provider_type(),
        }
    }

    fn protocol(&self) -> Protocol {
        match self {
            Self::Oidc(_) => Protocol::Oidc,
            Self::Saml(_) => Protocol::Saml,
        }
    }
}

/// `{base}/{protocol}/{providerType}/callback` with duplicate slashes
/// collapsed. The `scheme://` separator is left alone.
#[must_use]
pub fn build_callback_url(base: &str, protocol: Protocol, provider_type: ProviderType) -> String {
    let raw = format!("{base}/{protocol}/{provider_type}/callback");
    let (scheme, rest) = match raw.find("://") {
        Some(idx) => raw.split_at(idx + 3),
        None => ("", raw.as_str()),
    };

    let mut out = String::with_capacity(raw.len());
    out.push_str(scheme);
    let mut previous_slash = false;
    for ch in rest.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Keep only same-site relative paths as a post-login destination.
///
/// Anything else (absolute URLs, protocol-relative or encoded-slash tricks)
/// becomes `/`.
#[must_use]
pub fn sanitize_return_to(return_to: Option<&str>) -> String {
    let Some(candidate) = return_to.map(str::trim).filter(|s| !s.is_empty()) else {
        return "/".to_string();
    };

    let lower = candidate.to_lowercase();
    let safe = candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.starts_with("/\\")
        && !candidate.contains("://")
        && !lower.contains("%2f")
        && !lower.contains("%5c")
        && !lower.contains("%0a")
        && !lower.contains("%0d")
        && !candidate.contains('\\')
        && !candidate.chars().any(char::is_control);

    if safe {
        candidate.to_string()
    } else {
        tracing::warn!(return_to = %candidate, "Rejected unsafe return_to, using /");
        "/".to_string()
    }
}
