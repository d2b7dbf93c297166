//! Auth orchestrator: one login attempt from initiation to storefront session.

use serde_json::json;
use std::sync::Arc;
use storelink_core::{LinkId, ProviderId, TenantId};
use storelink_db::{
    LoginEventKind, NewLoginEvent, ProviderStatus, SsoProvider, Tenant, UpsertCustomerSsoLink,
};
use tracing::{info, instrument, warn};
use url::Url;

use super::directory::DirectoryFactory;
use super::login_code::{CodeDelivery, LoginCodeMessage};
use super::login_strategy::{DownstreamLogin, LoginRequest, LoginStrategy};
use super::records::RecordStore;
use crate::crypto::SecretCodec;
use crate::error::{SsoError, SsoResult};
use crate::models::{
    CallbackParams, ClientContext, InitiateRequest, InitiateResult, LoginOutcome,
    NormalizedProfile, PlatformCredentials, Protocol, ProviderConfig, ProviderType,
};
use crate::providers::saml::parse_relay_state;
use crate::providers::{sanitize_return_to, IdentityProvider, Provider, ProviderRegistry};
use crate::state::{CredentialHandoff, OtpCheck, RedirectState, StateService, OTP_TTL};

/// Event and customer-tag source for sign-ins by emailed code.
pub const LOGIN_CODE_SOURCE: &str = "login_code";

/// Storefront page that redeems a credential hand-off.
pub const DEFAULT_STOREFRONT_LOGIN_PATH: &str = "/account/login/sso";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Public base URL of this service; callback URLs hang off it.
    pub callback_base_url: String,
    pub storefront_login_path: String,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn new(callback_base_url: impl Into<String>) -> Self {
        Self {
            callback_base_url: callback_base_url.into(),
            storefront_login_path: DEFAULT_STOREFRONT_LOGIN_PATH.to_string(),
        }
    }
}

/// What is known about the attempt so far, for the audit trail.
struct Attempt {
    tenant_id: TenantId,
    tenant_known: bool,
    provider_id: Option<ProviderId>,
    provider_type: Option<ProviderType>,
    link_id: Option<LinkId>,
}

impl Attempt {
    fn new(tenant_id: TenantId, provider_type: Option<ProviderType>) -> Self {
        Self {
            tenant_id,
            tenant_known: false,
            provider_id: None,
            provider_type,
            link_id: None,
        }
    }
}

pub struct AuthOrchestrator {
    registry: Arc<ProviderRegistry>,
    records: Arc<dyn RecordStore>,
    directories: Arc<dyn DirectoryFactory>,
    codec: Arc<SecretCodec>,
    strategy: LoginStrategy,
    settings: OrchestratorSettings,
    code_delivery: Option<Arc<dyn CodeDelivery>>,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        records: Arc<dyn RecordStore>,
        directories: Arc<dyn DirectoryFactory>,
        codec: Arc<SecretCodec>,
        strategy: LoginStrategy,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            records,
            directories,
            codec,
            strategy,
            settings,
            code_delivery: None,
        }
    }

    /// Enable sign-in by emailed code.
    #[must_use]
    pub fn with_code_delivery(mut self, delivery: Arc<dyn CodeDelivery>) -> Self {
        self.code_delivery = Some(delivery);
        self
    }

    #[must_use]
    pub fn state(&self) -> &StateService {
        &self.registry.dependencies().state
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Start a login: resolve the tenant's provider and build the IdP redirect.
    #[instrument(skip(self, request, client), fields(tenant_id = %tenant_id))]
    pub async fn initiate_login(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
        request: &InitiateRequest,
        client: &ClientContext,
    ) -> SsoResult<InitiateResult> {
        let provider_type: ProviderType = provider_type.parse()?;
        let mut attempt = Attempt::new(tenant_id, Some(provider_type));

        let result = self
            .try_initiate(&mut attempt, provider_type, request, client)
            .await;
        if let Err(err) = &result {
            self.record_failure(&attempt, err, client).await;
        }
        result
    }

    async fn try_initiate(
        &self,
        attempt: &mut Attempt,
        provider_type: ProviderType,
        request: &InitiateRequest,
        client: &ClientContext,
    ) -> SsoResult<InitiateResult> {
        self.load_tenant(attempt).await?;

        let record = self
            .records
            .find_provider_by_type(attempt.tenant_id, provider_type.as_str())
            .await?
            .ok_or_else(|| {
                SsoError::ProviderNotConfigured(format!("{provider_type} is not set up for this store"))
            })?;
        attempt.provider_id = Some(ProviderId::from_uuid(record.id));

        check_provider_status(&record, request.test_mode)?;
        let provider = self.build_provider(&record, attempt.tenant_id)?;

        self.record(
            attempt,
            LoginEventKind::Initiated,
            client,
            None,
            json!({ "provider_type": provider_type.as_str(), "test_mode": request.test_mode }),
        )
        .await;

        let result = provider.initiate(request).await?;
        info!(provider_type = %provider_type, "Login initiated");
        Ok(result)
    }

    /// Finish a login for a known (tenant, provider) pair.
    ///
    /// `pre_consumed` is redirect state the caller already consumed.
    #[instrument(skip(self, params, client, pre_consumed), fields(tenant_id = %tenant_id, provider_id = %provider_id))]
    pub async fn handle_callback(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
        params: &CallbackParams,
        client: &ClientContext,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<LoginOutcome> {
        self.complete_callback(tenant_id, provider_id, None, params, client, pre_consumed)
            .await
    }

    /// OIDC callback: the `state` parameter identifies the attempt.
    #[instrument(skip(self, params, client))]
    pub async fn resolve_oidc_callback(
        &self,
        provider_type: &str,
        params: &CallbackParams,
        client: &ClientContext,
    ) -> SsoResult<LoginOutcome> {
        let provider_type = self.parse_for_protocol(provider_type, Protocol::Oidc)?;

        let key = params
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SsoError::InvalidState)?;
        let state = self
            .state()
            .consume_redirect_state(key)
            .await?
            .ok_or_else(|| {
                warn!("Redirect state missing, expired or already used");
                SsoError::InvalidState
            })?;

        self.complete_callback(
            state.tenant_id,
            state.provider_id,
            Some(provider_type),
            params,
            client,
            Some(state),
        )
        .await
    }

    /// SAML callback: the signed RelayState identifies tenant and provider.
    #[instrument(skip(self, params, client))]
    pub async fn resolve_saml_callback(
        &self,
        provider_type: &str,
        params: &CallbackParams,
        client: &ClientContext,
    ) -> SsoResult<LoginOutcome> {
        let provider_type = self.parse_for_protocol(provider_type, Protocol::Saml)?;

        let relay_state = params
            .relay_state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                warn!("SAML response without RelayState cannot be routed to a store");
                SsoError::InvalidState
            })?;
        let (tenant_id, provider_id) =
            parse_relay_state(&self.registry.dependencies().relay_state, relay_state)?;

        self.complete_callback(tenant_id, provider_id, Some(provider_type), params, client, None)
            .await
    }

    /// Single retrieval of a credential hand-off.
    pub async fn redeem_handoff(&self, token: &str) -> SsoResult<Option<CredentialHandoff>> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.state().consume_handoff(token).await?)
    }

    /// Where to send the browser after a successful callback.
    pub fn completion_url(&self, outcome: &LoginOutcome) -> SsoResult<String> {
        if let Some(url) = &outcome.redirect_url {
            return Ok(url.clone());
        }
        let token = outcome
            .handoff_token
            .as_deref()
            .ok_or_else(|| SsoError::Internal("login outcome has no hand-off token".to_string()))?;

        let mut url = Url::parse(&format!("https://{}", outcome.shop_domain.trim_end_matches('/')))
            .map_err(|e| SsoError::Internal(format!("invalid shop domain: {e}")))?;
        url.set_path(&self.settings.storefront_login_path);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }

    fn parse_for_protocol(&self, provider_type: &str, protocol: Protocol) -> SsoResult<ProviderType> {
        let parsed: ProviderType = provider_type.parse()?;
        if self.registry.protocol_for(provider_type)? != protocol {
            return Err(SsoError::InvalidRequest(format!(
                "{parsed} does not use {protocol}"
            )));
        }
        Ok(parsed)
    }

    async fn complete_callback(
        &self,
        tenant_id: TenantId,
        provider_id: ProviderId,
        expected_type: Option<ProviderType>,
        params: &CallbackParams,
        client: &ClientContext,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<LoginOutcome> {
        let mut attempt = Attempt::new(tenant_id, expected_type);
        attempt.provider_id = Some(provider_id);

        let result = self
            .try_callback(&mut attempt, expected_type, params, client, pre_consumed)
            .await;
        if let Err(err) = &result {
            self.record_failure(&attempt, err, client).await;
        }
        result
    }

    async fn try_callback(
        &self,
        attempt: &mut Attempt,
        expected_type: Option<ProviderType>,
        params: &CallbackParams,
        client: &ClientContext,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<LoginOutcome> {
        let tenant_id = attempt.tenant_id;
        let provider_id = attempt
            .provider_id
            .ok_or_else(|| SsoError::Internal("callback without provider id".to_string()))?;

        // Tenant and storefront credentials are checked before any IdP work.
        let tenant = self.load_tenant(attempt).await?;

        if let (Some(expected), Some(state)) = (expected_type, pre_consumed.as_ref()) {
            if state.provider_type != expected {
                warn!(state_type = %state.provider_type, "Callback path does not match redirect state");
                return Err(SsoError::InvalidState);
            }
        }

        let access_token = self.access_token(&tenant)?;

        let record = self
            .records
            .find_provider(tenant_id, provider_id)
            .await?
            .ok_or_else(|| SsoError::ProviderNotConfigured(format!("provider {provider_id}")))?;
        attempt.provider_type = ProviderType::parse(&record.provider_type);

        if let Some(expected) = expected_type {
            if record.provider_type != expected.as_str() {
                warn!(record_type = %record.provider_type, "Provider type does not match callback path");
                return Err(SsoError::InvalidState);
            }
        }

        // Pending records may only finish a test flow.
        let allow_pending = pre_consumed.as_ref().map_or(true, |s| s.test_mode);
        check_provider_status(&record, allow_pending)?;

        let provider = self.build_provider(&record, tenant_id)?;
        let callback = provider.handle_callback(params, pre_consumed).await?;

        if !record.is_usable() {
            if !callback.test_mode {
                return Err(SsoError::ProviderDisabled(record.provider_type.clone()));
            }
            self.records.activate_provider(tenant_id, provider_id).await?;
            info!(provider_type = %record.provider_type, "Provider activated by test login");
        }

        let profile = callback.profile;
        let link = self
            .records
            .upsert_link(UpsertCustomerSsoLink {
                tenant_id: tenant_id.into_uuid(),
                provider_id: provider_id.into_uuid(),
                external_id: profile.external_id.clone(),
                email: profile.email.clone(),
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
            })
            .await?;
        let link_id = LinkId::from_uuid(link.id);
        attempt.link_id = Some(link_id);

        if link.is_blocked() {
            warn!(link_id = %link_id, "Blocked customer attempted to sign in");
            return Err(SsoError::UserBlocked);
        }

        let return_to = sanitize_return_to(callback.return_to.as_deref());
        let multipass_secret = self.multipass_secret(&tenant)?;

        let provider_type = provider.provider_type();
        let directory = self.directories.for_tenant(&tenant.shop_domain, &access_token);
        let login = self
            .strategy
            .complete(
                &LoginRequest {
                    shop_domain: &tenant.shop_domain,
                    is_plus_tier: tenant.is_plus_tier,
                    multipass_secret: multipass_secret.as_deref(),
                    source: provider_type.as_str(),
                    profile: &profile,
                    return_to: &return_to,
                },
                directory.as_ref(),
            )
            .await?;

        let method = login.method();
        self.record(
            attempt,
            LoginEventKind::Success,
            client,
            None,
            json!({
                "provider_type": provider_type.as_str(),
                "method": method.as_str(),
                "test_mode": callback.test_mode,
            }),
        )
        .await;
        info!(link_id = %link_id, method = method.as_str(), "Login completed");

        let (redirect_url, handoff_token) = match login {
            DownstreamLogin::Multipass { redirect_url } => (Some(redirect_url), None),
            DownstreamLogin::Password { handoff_token } => (None, Some(handoff_token)),
        };

        Ok(LoginOutcome {
            success: true,
            method,
            email: profile.email,
            redirect_url,
            handoff_token,
            return_to,
            link_id: Some(link_id),
            shop_domain: tenant.shop_domain,
        })
    }

    /// Email a login code to a known customer of the store.
    ///
    /// Unknown, blocked and locked-out addresses succeed silently so the
    /// response never reveals who has an account. Delivery failures are
    /// logged, not returned.
    #[instrument(skip(self, email, client), fields(tenant_id = %tenant_id))]
    pub async fn request_login_code(
        &self,
        tenant_id: TenantId,
        email: &str,
        client: &ClientContext,
    ) -> SsoResult<()> {
        let delivery = self.code_delivery.as_ref().ok_or_else(|| {
            SsoError::ProviderNotConfigured("login codes are not enabled".to_string())
        })?;
        let email = normalize_email(email)?;
        let mut attempt = Attempt::new(tenant_id, None);

        let result = self
            .try_request_code(&mut attempt, delivery.as_ref(), &email, client)
            .await;
        if let Err(err) = &result {
            self.record_failure(&attempt, err, client).await;
        }
        result
    }

    async fn try_request_code(
        &self,
        attempt: &mut Attempt,
        delivery: &dyn CodeDelivery,
        email: &str,
        client: &ClientContext,
    ) -> SsoResult<()> {
        let tenant = self.load_tenant(attempt).await?;
        let access_token = self.access_token(&tenant)?;

        let directory = self.directories.for_tenant(&tenant.shop_domain, &access_token);
        if directory.find_by_email(email).await?.is_none() {
            info!("Login code requested for unknown customer");
            return Ok(());
        }
        if self.records.is_email_blocked(attempt.tenant_id, email).await? {
            warn!("Login code requested for blocked customer");
            return Ok(());
        }
        let Some(code) = self.state().issue_otp(attempt.tenant_id, email).await? else {
            warn!("Login code requested while locked out");
            return Ok(());
        };

        let message = LoginCodeMessage {
            tenant_id: attempt.tenant_id,
            shop_domain: tenant.shop_domain.clone(),
            email: email.to_string(),
            code,
            expires_in: OTP_TTL.as_secs(),
        };
        if let Err(err) = delivery.deliver(&message).await {
            tracing::error!(error = %err, "Failed to deliver login code");
        }

        self.record(
            attempt,
            LoginEventKind::Initiated,
            client,
            None,
            json!({ "method": LOGIN_CODE_SOURCE }),
        )
        .await;
        Ok(())
    }

    /// Finish a login with an emailed code.
    #[instrument(skip(self, email, code, return_to, client), fields(tenant_id = %tenant_id))]
    pub async fn complete_code_login(
        &self,
        tenant_id: TenantId,
        email: &str,
        code: &str,
        return_to: Option<&str>,
        client: &ClientContext,
    ) -> SsoResult<LoginOutcome> {
        if self.code_delivery.is_none() {
            return Err(SsoError::ProviderNotConfigured(
                "login codes are not enabled".to_string(),
            ));
        }
        let email = normalize_email(email)?;
        let mut attempt = Attempt::new(tenant_id, None);

        let result = self
            .try_code_login(&mut attempt, &email, code, return_to, client)
            .await;
        if let Err(err) = &result {
            self.record_failure(&attempt, err, client).await;
        }
        result
    }

    async fn try_code_login(
        &self,
        attempt: &mut Attempt,
        email: &str,
        code: &str,
        return_to: Option<&str>,
        client: &ClientContext,
    ) -> SsoResult<LoginOutcome> {
        let tenant = self.load_tenant(attempt).await?;
        let access_token = self.access_token(&tenant)?;

        match self.state().verify_otp(attempt.tenant_id, email, code).await? {
            OtpCheck::Verified => {}
            OtpCheck::Rejected { remaining } => {
                warn!(remaining, "Wrong login code");
                return Err(SsoError::InvalidCode);
            }
            OtpCheck::Expired => return Err(SsoError::InvalidCode),
            OtpCheck::LockedOut => return Err(SsoError::TooManyAttempts),
        }
        if self.records.is_email_blocked(attempt.tenant_id, email).await? {
            warn!("Blocked customer attempted to sign in with a login code");
            return Err(SsoError::UserBlocked);
        }

        let profile = NormalizedProfile {
            external_id: email.to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            display_name: None,
            avatar_url: None,
            raw: json!({ "email": email }),
        };
        let return_to = sanitize_return_to(return_to);
        let multipass_secret = self.multipass_secret(&tenant)?;

        let directory = self.directories.for_tenant(&tenant.shop_domain, &access_token);
        let login = self
            .strategy
            .complete(
                &LoginRequest {
                    shop_domain: &tenant.shop_domain,
                    is_plus_tier: tenant.is_plus_tier,
                    multipass_secret: multipass_secret.as_deref(),
                    source: LOGIN_CODE_SOURCE,
                    profile: &profile,
                    return_to: &return_to,
                },
                directory.as_ref(),
            )
            .await?;

        let method = login.method();
        self.record(
            attempt,
            LoginEventKind::Success,
            client,
            None,
            json!({ "source": LOGIN_CODE_SOURCE, "method": method.as_str() }),
        )
        .await;
        info!(method = method.as_str(), "Login code sign-in completed");

        let (redirect_url, handoff_token) = match login {
            DownstreamLogin::Multipass { redirect_url } => (Some(redirect_url), None),
            DownstreamLogin::Password { handoff_token } => (None, Some(handoff_token)),
        };

        Ok(LoginOutcome {
            success: true,
            method,
            email: profile.email,
            redirect_url,
            handoff_token,
            return_to,
            link_id: None,
            shop_domain: tenant.shop_domain,
        })
    }

    fn multipass_secret(&self, tenant: &Tenant) -> SsoResult<Option<String>> {
        match &tenant.multipass_secret_encrypted {
            Some(encrypted) if tenant.is_plus_tier && !encrypted.is_empty() => {
                Ok(Some(self.codec.decrypt_str(encrypted)?))
            }
            _ => Ok(None),
        }
    }

    async fn load_tenant(&self, attempt: &mut Attempt) -> SsoResult<Tenant> {
        let tenant = self
            .records
            .find_tenant(attempt.tenant_id)
            .await?
            .ok_or(SsoError::TenantNotFound(attempt.tenant_id))?;
        attempt.tenant_known = true;

        if !tenant.is_active() {
            return Err(SsoError::TenantInactive(attempt.tenant_id));
        }
        Ok(tenant)
    }

    fn access_token(&self, tenant: &Tenant) -> SsoResult<String> {
        let tenant_id = TenantId::from_uuid(tenant.id);
        let encrypted = tenant
            .credentials_encrypted
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SsoError::MissingStoreCredentials(tenant_id))?;

        let credentials: PlatformCredentials = self.codec.decrypt(encrypted)?;
        if credentials.access_token.trim().is_empty() {
            return Err(SsoError::MissingStoreCredentials(tenant_id));
        }
        Ok(credentials.access_token)
    }

    fn build_provider(&self, record: &SsoProvider, tenant_id: TenantId) -> SsoResult<Provider> {
        let config: ProviderConfig = self.codec.decrypt(&record.config_encrypted)?;
        self.registry.create(
            &record.provider_type,
            config,
            &self.settings.callback_base_url,
            tenant_id,
            ProviderId::from_uuid(record.id),
        )
    }

    async fn record_failure(&self, attempt: &Attempt, err: &SsoError, client: &ClientContext) {
        if !attempt.tenant_known {
            return;
        }
        let metadata = json!({
            "provider_type": attempt.provider_type.map(|t| t.as_str()),
        });
        self.record(attempt, LoginEventKind::Failed, client, Some(err.code()), metadata)
            .await;
    }

    /// Append an audit event. Failures are logged and never surface.
    async fn record(
        &self,
        attempt: &Attempt,
        kind: LoginEventKind,
        client: &ClientContext,
        error_code: Option<&str>,
        metadata: serde_json::Value,
    ) {
        let event = NewLoginEvent {
            tenant_id: attempt.tenant_id.into_uuid(),
            provider_id: attempt.provider_id.map(ProviderId::into_uuid),
            link_id: attempt.link_id.map(LinkId::into_uuid),
            kind,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            error_code: error_code.map(str::to_string),
            metadata,
        };
        if let Err(err) = self.records.append_event(event).await {
            tracing::error!(error = %err, kind = kind.as_str(), "Failed to append login event");
        }
    }
}

/// Trimmed, lowercased address; anything without an `@` is rejected.
fn normalize_email(email: &str) -> SsoResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(SsoError::InvalidRequest("a valid email address is required".to_string())),
    }
}

/// Usable records pass; `pending_setup` passes only when allowed.
fn check_provider_status(record: &SsoProvider, allow_pending: bool) -> SsoResult<()> {
    if record.is_usable() || (allow_pending && record.status() == ProviderStatus::PendingSetup) {
        return Ok(());
    }
    Err(SsoError::ProviderDisabled(record.provider_type.clone()))
}
