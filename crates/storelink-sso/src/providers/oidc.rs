//! OIDC / OAuth2 authorization-code provider.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::id_token::IdTokenExpectations;
use super::pkce::PkcePair;
use super::{sanitize_return_to, IdentityProvider, Provider, ProviderContext};
use crate::crypto::generate_token;
use crate::error::{SsoError, SsoResult};
use crate::models::{
    CallbackParams, CallbackResult, InitiateRequest, InitiateResult, NormalizedProfile, OidcConfig,
    Protocol, ProviderConfig, ProviderType, TokenSet,
};
use crate::state::RedirectState;

/// Random bytes in the OIDC nonce.
const NONCE_BYTES: usize = 16;

/// Maximum IdP error body kept in logs.
const MAX_LOGGED_ERROR_LEN: usize = 500;

/// Endpoints of a known vendor, used when the config names none.
struct VendorEndpoints {
    authorization: &'static str,
    token: &'static str,
    userinfo: Option<&'static str>,
    jwks_uri: Option<&'static str>,
    issuer: Option<&'static str>,
}

fn vendor_endpoints(provider_type: ProviderType) -> Option<VendorEndpoints> {
    match provider_type {
        ProviderType::Google => Some(VendorEndpoints {
            authorization: "https://accounts.google.com/o/oauth2/v2/auth",
            token: "https://oauth2.googleapis.com/token",
            userinfo: Some("https://openidconnect.googleapis.com/v1/userinfo"),
            jwks_uri: Some("https://www.googleapis.com/oauth2/v3/certs"),
            issuer: Some("https://accounts.google.com"),
        }),
        // `common` accepts any Entra tenant, so the issuer varies per user.
        ProviderType::Microsoft => Some(VendorEndpoints {
            authorization: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            token: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            userinfo: Some("https://graph.microsoft.com/oidc/userinfo"),
            jwks_uri: Some("https://login.microsoftonline.com/common/discovery/v2.0/keys"),
            issuer: None,
        }),
        ProviderType::Facebook => Some(VendorEndpoints {
            authorization: "https://www.facebook.com/v18.0/dialog/oauth",
            token: "https://graph.facebook.com/v18.0/oauth/access_token",
            userinfo: Some(
                "https://graph.facebook.com/me?fields=id,email,first_name,last_name,name,picture",
            ),
            jwks_uri: None,
            issuer: None,
        }),
        _ => None,
    }
}

/// Endpoints in effect for one provider instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: Option<String>,
    pub jwks_uri: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Clone)]
pub struct OidcProvider {
    ctx: ProviderContext,
    config: OidcConfig,
}

impl OidcProvider {
    #[must_use]
    pub fn new(ctx: ProviderContext, config: OidcConfig) -> Self {
        Self { ctx, config }
    }

    /// Registry constructor.
    pub fn construct(ctx: ProviderContext, config: ProviderConfig) -> SsoResult<Provider> {
        match config {
            ProviderConfig::Oidc(config) => Ok(Provider::Oidc(Self::new(ctx, config))),
            ProviderConfig::Saml(_) => Err(SsoError::ProviderNotConfigured(format!(
                "{} expects an OIDC configuration",
                ctx.provider_type
            ))),
        }
    }

    /// Explicit config URLs win, then discovery, then vendor defaults.
    pub async fn resolve_endpoints(&self) -> SsoResult<ResolvedEndpoints> {
        let c = &self.config;
        let explicit = c.authorization_url.is_some() && c.token_url.is_some();

        let mut resolved = if explicit {
            ResolvedEndpoints {
                authorization: String::new(),
                token: String::new(),
                userinfo: None,
                jwks_uri: None,
                issuer: c.issuer_url.clone(),
            }
        } else if let Some(issuer_url) = &c.issuer_url {
            let discovered = self.ctx.discovery.discover(issuer_url).await?;
            ResolvedEndpoints {
                authorization: discovered.authorization_endpoint.clone(),
                token: discovered.token_endpoint.clone(),
                userinfo: discovered.userinfo_endpoint.clone(),
                jwks_uri: discovered.jwks_uri.clone(),
                issuer: Some(discovered.issuer.clone()),
            }
        } else if let Some(vendor) = vendor_endpoints(self.ctx.provider_type) {
            ResolvedEndpoints {
                authorization: vendor.authorization.to_string(),
                token: vendor.token.to_string(),
                userinfo: vendor.userinfo.map(str::to_string),
                jwks_uri: vendor.jwks_uri.map(str::to_string),
                issuer: vendor.issuer.map(str::to_string),
            }
        } else {
            return Err(SsoError::ProviderNotConfigured(format!(
                "{} needs issuer_url or explicit authorization_url and token_url",
                self.ctx.provider_type
            )));
        };

        if let Some(url) = &c.authorization_url {
            resolved.authorization.clone_from(url);
        }
        if let Some(url) = &c.token_url {
            resolved.token.clone_from(url);
        }
        if c.userinfo_url.is_some() {
            resolved.userinfo.clone_from(&c.userinfo_url);
        }
        if c.jwks_uri.is_some() {
            resolved.jwks_uri.clone_from(&c.jwks_uri);
        }

        Ok(resolved)
    }

    fn scopes(&self) -> String {
        match &self.config.scopes {
            Some(scopes) if !scopes.is_empty() => scopes.join(" "),
            _ => self.default_scopes().join(" "),
        }
    }

    fn authorization_url(
        &self,
        endpoint: &str,
        state: &str,
        nonce: &str,
        pkce_challenge: &str,
    ) -> SsoResult<String> {
        let mut url = url::Url::parse(endpoint).map_err(|e| {
            SsoError::ProviderNotConfigured(format!("invalid authorization endpoint: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.ctx.callback_url)
            .append_pair("scope", &self.scopes())
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .append_pair("code_challenge", pkce_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: Option<&str>,
    ) -> SsoResult<TokenSet> {
        self.ctx.discovery.check_url(token_endpoint)?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.ctx.callback_url.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .ctx
            .http
            .post(token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| SsoError::ProviderUnreachable(format!("token endpoint: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                token_endpoint = %token_endpoint,
                status = %status,
                error = %truncate_for_log(&body),
                "Token exchange failed"
            );
            let error = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "token_exchange_failed".to_string());
            return Err(SsoError::ProviderAuthError {
                error,
                description: Some(format!("token endpoint returned HTTP {status}")),
            });
        }

        response.json::<TokenSet>().await.map_err(|e| SsoError::ProviderAuthError {
            error: "invalid_token_response".to_string(),
            description: Some(e.to_string()),
        })
    }

    async fn fetch_userinfo(&self, endpoint: &str, access_token: &str) -> SsoResult<Map<String, Value>> {
        self.ctx.discovery.check_url(endpoint)?;

        let response = self
            .ctx
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| SsoError::ProviderUnreachable(format!("userinfo endpoint: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SsoError::ProviderAuthError {
                error: "userinfo_failed".to_string(),
                description: Some(format!("userinfo endpoint returned HTTP {status}")),
            });
        }

        match response.json::<Value>().await {
            Ok(Value::Object(claims)) => Ok(claims),
            Ok(_) | Err(_) => Err(SsoError::provider_auth("invalid_userinfo_response")),
        }
    }

    async fn load_redirect_state(
        &self,
        params: &CallbackParams,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<RedirectState> {
        let state = match pre_consumed {
            Some(state) => state,
            None => {
                let token = params
                    .state
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or(SsoError::InvalidState)?;
                self.ctx
                    .state
                    .consume_redirect_state(token)
                    .await?
                    .ok_or(SsoError::InvalidState)?
            }
        };

        if !state.is_bound_to(self.ctx.tenant_id, self.ctx.provider_id) {
            warn!(
                tenant_id = %self.ctx.tenant_id,
                provider_id = %self.ctx.provider_id,
                "Redirect state bound to another tenant or provider"
            );
            return Err(SsoError::InvalidState);
        }
        Ok(state)
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    #[instrument(skip(self, request), fields(tenant_id = %self.ctx.tenant_id, provider_type = %self.ctx.provider_type))]
    async fn initiate(&self, request: &InitiateRequest) -> SsoResult<InitiateResult> {
        let endpoints = self.resolve_endpoints().await?;

        let nonce = generate_token(NONCE_BYTES);
        let pkce = PkcePair::generate();

        let mut redirect_state =
            RedirectState::new(self.ctx.tenant_id, self.ctx.provider_id, self.ctx.provider_type);
        redirect_state.nonce = Some(nonce.clone());
        redirect_state.code_verifier = Some(pkce.verifier.clone());
        redirect_state.return_to = Some(sanitize_return_to(request.return_to.as_deref()));
        redirect_state.test_mode = request.test_mode;

        let state = self.ctx.state.create_redirect_state(&redirect_state).await?;
        let redirect_url =
            self.authorization_url(&endpoints.authorization, &state, &nonce, &pkce.challenge)?;

        Ok(InitiateResult {
            redirect_url,
            state,
            nonce: Some(nonce),
        })
    }

    #[instrument(skip(self, params, pre_consumed), fields(tenant_id = %self.ctx.tenant_id, provider_type = %self.ctx.provider_type))]
    async fn handle_callback(
        &self,
        params: &CallbackParams,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<CallbackResult> {
        let state = self.load_redirect_state(params, pre_consumed).await?;

        if let Some(error) = &params.error {
            return Err(SsoError::ProviderAuthError {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SsoError::provider_auth("missing_code"))?;

        let endpoints = self.resolve_endpoints().await?;
        let tokens = self
            .exchange_code(&endpoints.token, code, state.code_verifier.as_deref())
            .await?;

        let mut claims = match &tokens.id_token {
            Some(id_token) => {
                let expected = IdTokenExpectations {
                    client_id: &self.config.client_id,
                    nonce: state.nonce.as_deref(),
                    issuer: endpoints.issuer.as_deref(),
                    jwks_uri: endpoints.jwks_uri.as_deref(),
                };
                self.ctx.id_tokens.verify(id_token, &expected).await?
            }
            None => Map::new(),
        };

        let needs_userinfo = claims.is_empty() || !claims.contains_key("email");
        if needs_userinfo {
            if let Some(userinfo_endpoint) = &endpoints.userinfo {
                let userinfo = self
                    .fetch_userinfo(userinfo_endpoint, &tokens.access_token)
                    .await?;
                merge_userinfo(&mut claims, userinfo)?;
            }
        }

        let profile = profile_from_claims(claims, endpoints.issuer.is_some())?;
        info!(external_id = %profile.external_id, "OIDC callback validated");

        Ok(CallbackResult {
            profile,
            tokens: Some(tokens),
            return_to: state.return_to,
            test_mode: state.test_mode,
        })
    }

    fn validate_config(&self) -> bool {
        let c = &self.config;
        let has_endpoints = (c.authorization_url.is_some() && c.token_url.is_some())
            || c.issuer_url.is_some()
            || vendor_endpoints(self.ctx.provider_type).is_some();
        !c.client_id.trim().is_empty() && !c.client_secret.trim().is_empty() && has_endpoints
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        match self.ctx.provider_type {
            ProviderType::Google | ProviderType::Microsoft | ProviderType::Facebook => {
                &["client_id", "client_secret"]
            }
            _ => &["client_id", "client_secret", "issuer_url"],
        }
    }

    fn default_scopes(&self) -> Vec<String> {
        let scopes: &[&str] = match self.ctx.provider_type {
            ProviderType::Facebook => &["email", "public_profile"],
            _ => &["openid", "email", "profile"],
        };
        scopes.iter().map(|s| (*s).to_string()).collect()
    }

    fn provider_type(&self) -> ProviderType {
        self.ctx.provider_type
    }

    fn protocol(&self) -> Protocol {
        Protocol::Oidc
    }
}

/// Fill gaps in the ID-token claims from userinfo. A userinfo `sub` that
/// differs from the ID token's indicates token substitution.
fn merge_userinfo(claims: &mut Map<String, Value>, userinfo: Map<String, Value>) -> SsoResult<()> {
    if let (Some(token_sub), Some(info_sub)) = (claims.get("sub"), userinfo.get("sub")) {
        if token_sub != info_sub {
            return Err(SsoError::ProviderAuthError {
                error: "subject_mismatch".to_string(),
                description: Some("userinfo sub differs from ID token sub".to_string()),
            });
        }
    }
    for (key, value) in userinfo {
        claims.entry(key).or_insert(value);
    }
    Ok(())
}

fn claim_str(claims: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match claims.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `email_verified` as sent; some IdPs send the string form.
fn email_verified(claims: &Map<String, Value>) -> Option<bool> {
    match claims.get("email_verified") {
        Some(Value::Bool(verified)) => Some(*verified),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Map OIDC claims (or a Facebook Graph profile) to a normalized profile.
///
/// `preferred_username` and `upn` stand in for a missing `email` only when
/// the issuer is pinned; under a multi-tenant issuer any directory can mint
/// them.
pub(crate) fn profile_from_claims(
    claims: Map<String, Value>,
    issuer_pinned: bool,
) -> SsoResult<NormalizedProfile> {
    let external_id = claim_str(&claims, &["sub", "id", "oid"])
        .ok_or_else(|| SsoError::provider_auth("missing_subject"))?;

    if email_verified(&claims) == Some(false) {
        warn!(external_id = %external_id, "IdP reports the email as unverified");
        return Err(SsoError::provider_auth("email_not_verified"));
    }

    let email_claims: &[&str] = if issuer_pinned {
        &["email", "preferred_username", "upn"]
    } else {
        &["email"]
    };
    let email = claim_str(&claims, email_claims)
        .filter(|e| e.contains('@'))
        .ok_or_else(|| SsoError::provider_auth("missing_email"))?;

    // Facebook nests the picture URL under picture.data.url.
    let avatar_url = match claims.get("picture") {
        Some(Value::String(url)) => Some(url.clone()),
        Some(picture) => picture
            .pointer("/data/url")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    };

    Ok(NormalizedProfile {
        external_id,
        email,
        first_name: claim_str(&claims, &["given_name", "first_name"]),
        last_name: claim_str(&claims, &["family_name", "last_name"]),
        display_name: claim_str(&claims, &["name"]),
        avatar_url,
        raw: Value::Object(claims),
    })
}

fn truncate_for_log(text: &str) -> String {
    if text.len() <= MAX_LOGGED_ERROR_LEN {
        return text.to_string();
    }
    let safe_end = text
        .char_indices()
        .take_while(|(i, _)| *i < MAX_LOGGED_ERROR_LEN)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    format!("{}... (truncated)", &text[..safe_end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::context;
    use serde_json::json;

    fn google(config: OidcConfig) -> OidcProvider {
        OidcProvider::new(context(ProviderType::Google), config)
    }

    fn config() -> OidcConfig {
        OidcConfig {
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
            issuer_url: None,
            authorization_url: None,
            token_url: None,
            userinfo_url: None,
            jwks_uri: None,
            scopes: None,
        }
    }

    #[tokio::test]
    async fn test_vendor_endpoints_used_without_config_urls() {
        let endpoints = google(config()).resolve_endpoints().await.unwrap();
        assert_eq!(endpoints.authorization, "https://accounts.google.com/o/oauth2/v2/auth");
        assert_eq!(endpoints.issuer.as_deref(), Some("https://accounts.google.com"));
    }

    #[tokio::test]
    async fn test_explicit_urls_override_vendor() {
        let mut c = config();
        c.authorization_url = Some("https://idp.example.com/authorize".into());
        c.token_url = Some("https://idp.example.com/token".into());
        let endpoints = google(c).resolve_endpoints().await.unwrap();
        assert_eq!(endpoints.token, "https://idp.example.com/token");
        assert!(endpoints.jwks_uri.is_none());
    }

    #[tokio::test]
    async fn test_custom_without_endpoints_is_not_configured() {
        let provider = OidcProvider::new(context(ProviderType::Custom), config());
        assert!(!provider.validate_config());
        let err = provider.resolve_endpoints().await.unwrap_err();
        assert!(matches!(err, SsoError::ProviderNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_initiate_builds_pkce_authorization_url() {
        let provider = google(config());
        let result = provider
            .initiate(&InitiateRequest {
                return_to: Some("/cart".into()),
                test_mode: false,
            })
            .await
            .unwrap();

        let url = url::Url::parse(&result.redirect_url).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "https://sso.example.com/oidc/google/callback");
        assert_eq!(query["scope"], "openid email profile");
        assert_eq!(query["state"], result.state);
        assert_eq!(Some(&query["nonce"]), result.nonce.as_ref());
        assert_eq!(query["code_challenge_method"], "S256");

        let stored = provider
            .ctx
            .state
            .peek_redirect_state(&result.state)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.return_to.as_deref(), Some("/cart"));
        let verifier = stored.code_verifier.unwrap();
        assert_eq!(query["code_challenge"], super::super::pkce::s256_challenge(&verifier));
    }

    #[tokio::test]
    async fn test_callback_with_unknown_state_is_invalid() {
        let provider = google(config());
        let params = CallbackParams {
            code: Some("code".into()),
            state: Some("never-issued".into()),
            ..CallbackParams::default()
        };
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[tokio::test]
    async fn test_callback_state_for_other_provider_is_invalid() {
        let provider = google(config());
        let foreign = RedirectState::new(
            provider.ctx.tenant_id,
            storelink_core::ProviderId::new(),
            ProviderType::Google,
        );
        let err = provider
            .handle_callback(&CallbackParams::default(), Some(foreign))
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[tokio::test]
    async fn test_idp_error_param_burns_state() {
        let provider = google(config());
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();
        let params = CallbackParams {
            state: Some(init.state.clone()),
            error: Some("access_denied".into()),
            error_description: Some("user cancelled".into()),
            ..CallbackParams::default()
        };
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "access_denied"));

        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[test]
    fn test_profile_from_oidc_claims() {
        let claims = json!({
            "sub": "abc",
            "email": "alice@example.com",
            "given_name": "Alice",
            "family_name": "Doe",
            "name": "Alice Doe",
            "picture": "https://img.example.com/a.png"
        });
        let profile = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap();
        assert_eq!(profile.external_id, "abc");
        assert_eq!(profile.first_name.as_deref(), Some("Alice"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://img.example.com/a.png"));
        assert_eq!(profile.raw["sub"], "abc");
    }

    #[test]
    fn test_profile_from_facebook_graph() {
        let claims = json!({
            "id": 1234567890u64,
            "email": "bob@example.com",
            "first_name": "Bob",
            "last_name": "Smith",
            "picture": { "data": { "url": "https://fb.example.com/p.jpg" } }
        });
        let profile = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap();
        assert_eq!(profile.external_id, "1234567890");
        assert_eq!(profile.last_name.as_deref(), Some("Smith"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://fb.example.com/p.jpg"));
    }

    #[test]
    fn test_profile_without_email_fails() {
        let claims = json!({ "sub": "abc" });
        let err = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "missing_email"));
    }

    #[test]
    fn test_unverified_email_rejected() {
        let claims = json!({ "sub": "abc", "email": "victim@example.com", "email_verified": false });
        let err = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "email_not_verified"));

        let claims = json!({ "sub": "abc", "email": "victim@example.com", "email_verified": "false" });
        assert!(profile_from_claims(claims.as_object().unwrap().clone(), true).is_err());

        let claims = json!({ "sub": "abc", "email": "alice@example.com", "email_verified": "true" });
        let profile = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap();
        assert_eq!(profile.email, "alice@example.com");
    }

    #[test]
    fn test_upn_needs_pinned_issuer() {
        let claims = json!({ "sub": "abc", "upn": "victim@example.com" });
        let err = profile_from_claims(claims.as_object().unwrap().clone(), false).unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "missing_email"));

        let claims = json!({ "sub": "abc", "preferred_username": "victim@example.com" });
        assert!(profile_from_claims(claims.as_object().unwrap().clone(), false).is_err());

        let claims = json!({ "sub": "abc", "upn": "alice@contoso.example" });
        let profile = profile_from_claims(claims.as_object().unwrap().clone(), true).unwrap();
        assert_eq!(profile.email, "alice@contoso.example");
    }

    #[test]
    fn test_userinfo_subject_mismatch() {
        let mut claims = json!({ "sub": "a" }).as_object().unwrap().clone();
        let userinfo = json!({ "sub": "b", "email": "x@example.com" })
            .as_object()
            .unwrap()
            .clone();
        assert!(merge_userinfo(&mut claims, userinfo).is_err());
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let text = "é".repeat(400);
        let truncated = truncate_for_log(&text);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncate_for_log("short") == "short");
    }
}
