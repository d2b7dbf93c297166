//! Provider registry: provider type token → protocol + constructor.

use std::collections::HashMap;
use storelink_core::{ProviderId, TenantId};

use super::{
    build_callback_url, DiscoveryService, IdTokenVerifier, OidcProvider, Provider,
    ProviderContext, SamlProvider,
};
use crate::crypto::RelayStateSigner;
use crate::error::{SsoError, SsoResult};
use crate::models::{Protocol, ProviderConfig, ProviderType};
use crate::state::StateService;

/// Builds a provider instance from its context and decrypted config.
pub type ProviderConstructor = fn(ProviderContext, ProviderConfig) -> SsoResult<Provider>;

#[derive(Clone, Copy)]
pub struct ProviderRegistration {
    pub protocol: Protocol,
    pub construct: ProviderConstructor,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

const OIDC: ProviderRegistration = ProviderRegistration {
    protocol: Protocol::Oidc,
    construct: OidcProvider::construct,
};

const SAML: ProviderRegistration = ProviderRegistration {
    protocol: Protocol::Saml,
    construct: SamlProvider::construct,
};

/// Built-in provider types.
pub const BUILTIN_PROVIDERS: [(ProviderType, ProviderRegistration); 10] = [
    (ProviderType::Google, OIDC),
    (ProviderType::Microsoft, OIDC),
    (ProviderType::Facebook, OIDC),
    (ProviderType::Auth0, OIDC),
    (ProviderType::Custom, OIDC),
    (ProviderType::CustomOauth, OIDC),
    (ProviderType::Okta, SAML),
    (ProviderType::Azure, SAML),
    (ProviderType::Onelogin, SAML),
    (ProviderType::Salesforce, SAML),
];

/// Built-in registration for a provider type.
#[must_use]
pub fn builtin_registration(provider_type: ProviderType) -> ProviderRegistration {
    match provider_type {
        ProviderType::Google
        | ProviderType::Microsoft
        | ProviderType::Facebook
        | ProviderType::Auth0
        | ProviderType::Custom
        | ProviderType::CustomOauth => OIDC,
        ProviderType::Okta
        | ProviderType::Azure
        | ProviderType::Onelogin
        | ProviderType::Salesforce => SAML,
    }
}

/// Shared services handed to every provider instance.
#[derive(Clone)]
pub struct ProviderDependencies {
    pub state: StateService,
    pub http: reqwest::Client,
    pub discovery: DiscoveryService,
    pub id_tokens: IdTokenVerifier,
    pub relay_state: RelayStateSigner,
}

pub struct ProviderRegistry {
    deps: ProviderDependencies,
    registrations: HashMap<ProviderType, ProviderRegistration>,
}

impl ProviderRegistry {
    /// Registry with every built-in provider type.
    #[must_use]
    pub fn new(deps: ProviderDependencies) -> Self {
        Self {
            deps,
            registrations: BUILTIN_PROVIDERS.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn dependencies(&self) -> &ProviderDependencies {
        &self.deps
    }

    /// Add or replace a registration.
    pub fn register(&mut self, provider_type: ProviderType, registration: ProviderRegistration) {
        self.registrations.insert(provider_type, registration);
    }

    #[must_use]
    pub fn has(&self, provider_type: &str) -> bool {
        ProviderType::parse(provider_type).is_some_and(|t| self.registrations.contains_key(&t))
    }

    /// Protocol registered for a type token.
    pub fn protocol_for(&self, provider_type: &str) -> SsoResult<Protocol> {
        Ok(self.registration(provider_type)?.1.protocol)
    }

    fn registration(&self, provider_type: &str) -> SsoResult<(ProviderType, ProviderRegistration)> {
        let parsed = ProviderType::parse(provider_type)
            .ok_or_else(|| SsoError::UnknownProvider(provider_type.to_string()))?;
        let registration = self
            .registrations
            .get(&parsed)
            .copied()
            .ok_or_else(|| SsoError::UnknownProvider(provider_type.to_string()))?;
        Ok((parsed, registration))
    }

    /// Construct a provider instance for one tenant's provider record.
    pub fn create(
        &self,
        provider_type: &str,
        config: ProviderConfig,
        callback_base_url: &str,
        tenant_id: TenantId,
        provider_id: ProviderId,
    ) -> SsoResult<Provider> {
        let (parsed, registration) = self.registration(provider_type)?;

        if config.protocol() != registration.protocol {
            return Err(SsoError::ProviderNotConfigured(format!(
                "{parsed} is a {} provider but its configuration is {}",
                registration.protocol,
                config.protocol()
            )));
        }

        let ctx = ProviderContext {
            tenant_id,
            provider_id,
            provider_type: parsed,
            callback_url: build_callback_url(callback_base_url, registration.protocol, parsed),
            state: self.deps.state.clone(),
            http: self.deps.http.clone(),
            discovery: self.deps.discovery.clone(),
            id_tokens: self.deps.id_tokens.clone(),
            relay_state: self.deps.relay_state.clone(),
        };

        let provider = (registration.construct)(ctx, config)?;
        if !super::IdentityProvider::validate_config(&provider) {
            return Err(SsoError::ProviderNotConfigured(format!(
                "{parsed} is missing required fields: {}",
                super::IdentityProvider::required_config_fields(&provider).join(", ")
            )));
        }
        Ok(provider)
    }
}
