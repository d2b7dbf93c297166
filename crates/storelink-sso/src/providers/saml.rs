//! SAML 2.0 Web SSO provider (SP side).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use quick_xml::escape::escape;
use serde_json::{Map, Value};
use std::io::Write;
use storelink_core::{ProviderId, TenantId};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::saml_response::{
    decode_saml_response, parse_saml_response, signed_claims, verify_signature,
    ParsedSamlResponse,
};
use super::{sanitize_return_to, IdentityProvider, Provider, ProviderContext};
use crate::crypto::RelayStateSigner;
use crate::error::{SsoError, SsoResult};
use crate::models::{
    CallbackParams, CallbackResult, InitiateRequest, InitiateResult, NormalizedProfile, Protocol,
    ProviderConfig, ProviderType, SamlConfig,
};
use crate::state::RedirectState;

/// Allowed clock skew on assertion conditions.
const CLOCK_SKEW_SECS: i64 = 60;

const EMAIL_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
const GIVEN_NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
const SURNAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
const NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
const DISPLAY_NAME_CLAIM: &str = "http://schemas.microsoft.com/identity/claims/displayname";

/// Attribute names tried, in order, when the config does not name one.
struct VendorAttributes {
    email: &'static [&'static str],
    first_name: &'static [&'static str],
    last_name: &'static [&'static str],
    name: &'static [&'static str],
}

fn vendor_attributes(provider_type: ProviderType) -> VendorAttributes {
    match provider_type {
        ProviderType::Onelogin => VendorAttributes {
            email: &["User.email", "email"],
            first_name: &["User.FirstName", "firstName"],
            last_name: &["User.LastName", "lastName"],
            name: &["User.DisplayName", "displayName"],
        },
        ProviderType::Azure => VendorAttributes {
            email: &[EMAIL_CLAIM, NAME_CLAIM],
            first_name: &[GIVEN_NAME_CLAIM],
            last_name: &[SURNAME_CLAIM],
            name: &[DISPLAY_NAME_CLAIM],
        },
        ProviderType::Okta => VendorAttributes {
            email: &["email", EMAIL_CLAIM],
            first_name: &["firstName", GIVEN_NAME_CLAIM],
            last_name: &["lastName", SURNAME_CLAIM],
            name: &["displayName", DISPLAY_NAME_CLAIM],
        },
        _ => VendorAttributes {
            email: &["email", "Email", EMAIL_CLAIM],
            first_name: &["firstName", "FirstName", GIVEN_NAME_CLAIM],
            last_name: &["lastName", "LastName", SURNAME_CLAIM],
            name: &["displayName", "name", DISPLAY_NAME_CLAIM],
        },
    }
}

fn first_attribute(
    response: &ParsedSamlResponse,
    configured: Option<&str>,
    defaults: &[&str],
) -> Option<String> {
    configured
        .into_iter()
        .chain(defaults.iter().copied())
        .find_map(|name| response.attribute(name))
        .map(str::to_string)
}

/// Verify a RelayState value and return the pair it carries.
pub fn parse_relay_state(
    signer: &RelayStateSigner,
    relay_state: &str,
) -> SsoResult<(TenantId, ProviderId)> {
    signer.verify(relay_state).ok_or_else(|| {
        warn!("Rejected unsigned or tampered RelayState");
        SsoError::InvalidState
    })
}

#[derive(Clone)]
pub struct SamlProvider {
    ctx: ProviderContext,
    config: SamlConfig,
}

impl SamlProvider {
    #[must_use]
    pub fn new(ctx: ProviderContext, config: SamlConfig) -> Self {
        Self { ctx, config }
    }

    /// Registry constructor.
    pub fn construct(ctx: ProviderContext, config: ProviderConfig) -> SsoResult<Provider> {
        match config {
            ProviderConfig::Saml(config) => Ok(Provider::Saml(Self::new(ctx, config))),
            ProviderConfig::Oidc(_) => Err(SsoError::ProviderNotConfigured(format!(
                "{} expects a SAML configuration",
                ctx.provider_type
            ))),
        }
    }

    /// Our entity id; the callback URL unless configured.
    #[must_use]
    pub fn sp_entity_id(&self) -> &str {
        self.config
            .sp_entity_id
            .as_deref()
            .unwrap_or(&self.ctx.callback_url)
    }

    fn authn_request_xml(&self, request_id: &str) -> String {
        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" "#,
                r#"IssueInstant="{instant}" Destination="{destination}" "#,
                r#"AssertionConsumerServiceURL="{acs}" "#,
                r#"ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<samlp:NameIDPolicy Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress" AllowCreate="true"/>"#,
                r#"</samlp:AuthnRequest>"#
            ),
            id = request_id,
            instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            destination = escape(self.config.entry_point.as_str()),
            acs = escape(self.ctx.callback_url.as_str()),
            issuer = escape(self.sp_entity_id()),
        )
    }

    /// DEFLATE + base64 for the HTTP-Redirect binding.
    fn encode_redirect(xml: &str) -> SsoResult<String> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(xml.as_bytes())
            .map_err(|e| SsoError::Internal(format!("deflate failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| SsoError::Internal(format!("deflate failed: {e}")))?;
        Ok(STANDARD.encode(compressed))
    }

    fn check_conditions(&self, response: &ParsedSamlResponse) -> SsoResult<()> {
        if !response.is_success() {
            return Err(SsoError::ProviderAuthError {
                error: "saml_status".to_string(),
                description: response.status_code.clone(),
            });
        }

        if response.assertion_count != 1 {
            return Err(SsoError::ProviderAuthError {
                error: "invalid_saml_response".to_string(),
                description: Some(format!(
                    "expected one assertion, found {}",
                    response.assertion_count
                )),
            });
        }

        if let Some(expected) = &self.config.idp_entity_id {
            if response.issuer.as_deref() != Some(expected.as_str()) {
                return Err(SsoError::ProviderAuthError {
                    error: "issuer_mismatch".to_string(),
                    description: response.issuer.clone(),
                });
            }
        }

        if !response.audiences.is_empty()
            && !response.audiences.iter().any(|a| a == self.sp_entity_id())
        {
            return Err(SsoError::ProviderAuthError {
                error: "audience_mismatch".to_string(),
                description: Some(response.audiences.join(",")),
            });
        }

        let now = Utc::now();
        let skew = Duration::seconds(CLOCK_SKEW_SECS);
        if let Some(not_before) = response.not_before {
            if now + skew < not_before {
                return Err(SsoError::provider_auth("assertion_not_yet_valid"));
            }
        }
        if let Some(not_on_or_after) = response.not_on_or_after {
            if now - skew >= not_on_or_after {
                return Err(SsoError::provider_auth("assertion_expired"));
            }
        }
        Ok(())
    }

    async fn load_redirect_state(
        &self,
        response: &ParsedSamlResponse,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<Option<RedirectState>> {
        let state = match (pre_consumed, response.in_response_to.as_deref()) {
            (Some(state), _) => Some(state),
            (None, Some(request_id)) => Some(
                self.ctx
                    .state
                    .consume_redirect_state(request_id)
                    .await?
                    .ok_or(SsoError::InvalidState)?,
            ),
            (None, None) if self.config.allow_idp_initiated => None,
            (None, None) => {
                warn!("Unsolicited SAML response rejected");
                return Err(SsoError::InvalidState);
            }
        };

        if let Some(state) = &state {
            if !state.is_bound_to(self.ctx.tenant_id, self.ctx.provider_id) {
                return Err(SsoError::InvalidState);
            }
        }
        Ok(state)
    }

    fn profile(&self, response: &ParsedSamlResponse) -> SsoResult<NormalizedProfile> {
        let mapping = &self.config.attribute_mapping;
        let defaults = vendor_attributes(self.ctx.provider_type);

        let email = first_attribute(response, mapping.email.as_deref(), defaults.email)
            .or_else(|| response.name_id.clone().filter(|id| id.contains('@')))
            .ok_or_else(|| SsoError::provider_auth("missing_email"))?;

        let external_id = response
            .name_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| email.clone());

        let mut raw = Map::new();
        for (name, values) in &response.attributes {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::from(many.to_vec()),
            };
            raw.insert(name.clone(), value);
        }
        if let Some(name_id) = &response.name_id {
            raw.insert("nameId".to_string(), Value::String(name_id.clone()));
        }
        if let Some(issuer) = &response.issuer {
            raw.insert("issuer".to_string(), Value::String(issuer.clone()));
        }
        if let Some(department) = mapping
            .department
            .as_deref()
            .and_then(|name| response.attribute(name))
        {
            raw.insert("department".to_string(), Value::String(department.to_string()));
        }

        Ok(NormalizedProfile {
            external_id,
            email,
            first_name: first_attribute(response, mapping.first_name.as_deref(), defaults.first_name),
            last_name: first_attribute(response, mapping.last_name.as_deref(), defaults.last_name),
            display_name: first_attribute(response, mapping.name.as_deref(), defaults.name),
            avatar_url: None,
            raw: Value::Object(raw),
        })
    }
}

#[async_trait]
impl IdentityProvider for SamlProvider {
    #[instrument(skip(self, request), fields(tenant_id = %self.ctx.tenant_id, provider_type = %self.ctx.provider_type))]
    async fn initiate(&self, request: &InitiateRequest) -> SsoResult<InitiateResult> {
        let request_id = format!("_{}", Uuid::new_v4());

        let mut redirect_state =
            RedirectState::new(self.ctx.tenant_id, self.ctx.provider_id, self.ctx.provider_type);
        redirect_state.return_to = Some(sanitize_return_to(request.return_to.as_deref()));
        redirect_state.test_mode = request.test_mode;
        self.ctx
            .state
            .store_redirect_state(&request_id, &redirect_state)
            .await?;

        let saml_request = Self::encode_redirect(&self.authn_request_xml(&request_id))?;
        let relay_state = self.ctx.relay_state.sign(self.ctx.tenant_id, self.ctx.provider_id);

        let mut url = url::Url::parse(&self.config.entry_point)
            .map_err(|e| SsoError::ProviderNotConfigured(format!("invalid SAML entry point: {e}")))?;
        url.query_pairs_mut()
            .append_pair("SAMLRequest", &saml_request)
            .append_pair("RelayState", &relay_state);

        Ok(InitiateResult {
            redirect_url: url.into(),
            state: request_id,
            nonce: None,
        })
    }

    #[instrument(skip(self, params, pre_consumed), fields(tenant_id = %self.ctx.tenant_id, provider_type = %self.ctx.provider_type))]
    async fn handle_callback(
        &self,
        params: &CallbackParams,
        pre_consumed: Option<RedirectState>,
    ) -> SsoResult<CallbackResult> {
        if let Some(relay_state) = params.relay_state.as_deref().filter(|r| !r.is_empty()) {
            let (tenant_id, provider_id) = parse_relay_state(&self.ctx.relay_state, relay_state)?;
            if tenant_id != self.ctx.tenant_id || provider_id != self.ctx.provider_id {
                return Err(SsoError::InvalidState);
            }
        }

        let encoded = params
            .saml_response
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SsoError::provider_auth("missing_saml_response"))?;

        let xml = decode_saml_response(encoded)?;
        let envelope = parse_saml_response(&xml)?;
        let signed = verify_signature(&xml, &self.config.certificate)?;
        let response = signed_claims(&envelope, &signed)?;
        self.check_conditions(&response)?;

        let state = self.load_redirect_state(&response, pre_consumed).await?;
        let profile = self.profile(&response)?;

        info!(external_id = %profile.external_id, "SAML assertion validated");

        let (return_to, test_mode) = match state {
            Some(state) => (state.return_to, state.test_mode),
            None => (Some("/".to_string()), false),
        };

        Ok(CallbackResult {
            profile,
            tokens: None,
            return_to,
            test_mode,
        })
    }

    fn validate_config(&self) -> bool {
        !self.config.entry_point.trim().is_empty() && !self.config.certificate.trim().is_empty()
    }

    fn required_config_fields(&self) -> &'static [&'static str] {
        &["entry_point", "certificate"]
    }

    fn default_scopes(&self) -> Vec<String> {
        Vec::new()
    }

    fn provider_type(&self) -> ProviderType {
        self.ctx.provider_type
    }

    fn protocol(&self) -> Protocol {
        Protocol::Saml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeMapping;
    use crate::providers::saml_response::test_support::{response_template, TestIdp};
    use crate::providers::test_support::context;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    fn provider(provider_type: ProviderType, idp: &TestIdp) -> SamlProvider {
        SamlProvider::new(
            context(provider_type),
            SamlConfig {
                entry_point: "https://idp.example.com/sso".into(),
                certificate: idp.certificate_pem.clone(),
                idp_entity_id: Some("https://idp.example.com".into()),
                sp_entity_id: None,
                attribute_mapping: AttributeMapping::default(),
                allow_idp_initiated: false,
            },
        )
    }

    fn signed_response(
        provider: &SamlProvider,
        idp: &TestIdp,
        in_response_to: Option<&str>,
        name_id: &str,
        attributes: &[(&str, &str)],
    ) -> String {
        let template = response_template(
            in_response_to,
            "https://idp.example.com",
            provider.sp_entity_id(),
            name_id,
            attributes,
        );
        idp.sign(&template, "_assertion-1")
    }

    fn post_xml(provider: &SamlProvider, xml: &str) -> CallbackParams {
        CallbackParams {
            saml_response: Some(STANDARD.encode(xml)),
            relay_state: Some(
                provider
                    .ctx
                    .relay_state
                    .sign(provider.ctx.tenant_id, provider.ctx.provider_id),
            ),
            ..CallbackParams::default()
        }
    }

    fn post(
        provider: &SamlProvider,
        idp: &TestIdp,
        in_response_to: Option<&str>,
        attributes: &[(&str, &str)],
    ) -> CallbackParams {
        let signed = signed_response(provider, idp, in_response_to, "alice@example.com", attributes);
        post_xml(provider, &signed)
    }

    fn assertion_of(xml: &str) -> &str {
        let start = xml.find("<saml:Assertion ").unwrap();
        let end = xml.find("</saml:Assertion>").unwrap() + "</saml:Assertion>".len();
        &xml[start..end]
    }

    #[tokio::test]
    async fn test_initiate_redirect_binding() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let result = provider
            .initiate(&InitiateRequest {
                return_to: Some("/orders".into()),
                test_mode: false,
            })
            .await
            .unwrap();
        assert!(result.state.starts_with('_'));
        assert!(result.nonce.is_none());

        let url = url::Url::parse(&result.redirect_url).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let compressed = STANDARD.decode(&query["SAMLRequest"]).unwrap();
        let mut xml = String::new();
        DeflateDecoder::new(&compressed[..]).read_to_string(&mut xml).unwrap();
        assert!(xml.contains(&format!(r#"ID="{}""#, result.state)));
        assert!(xml.contains("https://sso.example.com/saml/onelogin/callback"));

        assert_eq!(
            parse_relay_state(&provider.ctx.relay_state, &query["RelayState"]).unwrap(),
            (provider.ctx.tenant_id, provider.ctx.provider_id)
        );
        let stored = provider
            .ctx
            .state
            .peek_redirect_state(&result.state)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.return_to.as_deref(), Some("/orders"));
    }

    #[tokio::test]
    async fn test_callback_maps_onelogin_defaults_and_consumes_request() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();

        let params = post(
            &provider,
            &idp,
            Some(&init.state),
            &[
                ("User.email", "alice@example.com"),
                ("User.FirstName", "Alice"),
                ("User.LastName", "Doe"),
            ],
        );
        let result = provider.handle_callback(&params, None).await.unwrap();
        assert_eq!(result.profile.email, "alice@example.com");
        assert_eq!(result.profile.first_name.as_deref(), Some("Alice"));
        assert_eq!(result.profile.last_name.as_deref(), Some("Doe"));
        assert_eq!(result.profile.raw["issuer"], "https://idp.example.com");
        assert!(result.tokens.is_none());

        // InResponseTo state is single use
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[tokio::test]
    async fn test_name_id_fallback_for_email() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Salesforce, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();
        let params = post(&provider, &idp, Some(&init.state), &[("FirstName", "Alice")]);
        let result = provider.handle_callback(&params, None).await.unwrap();
        assert_eq!(result.profile.email, "alice@example.com");
        assert_eq!(result.profile.first_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_unsolicited_response_rejected_by_default() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Okta, &idp);
        let params = post(&provider, &idp, None, &[("email", "alice@example.com")]);
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[tokio::test]
    async fn test_idp_initiated_allowed_when_configured() {
        let idp = TestIdp::generate();
        let mut provider = provider(ProviderType::Okta, &idp);
        provider.config.allow_idp_initiated = true;
        let params = post(&provider, &idp, None, &[("email", "alice@example.com")]);
        let result = provider.handle_callback(&params, None).await.unwrap();
        assert_eq!(result.return_to.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_tampered_relay_state_rejected() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();
        let mut params = post(&provider, &idp, Some(&init.state), &[]);
        params.relay_state = Some(format!("{}:{}:forged", TenantId::new(), ProviderId::new()));
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::InvalidState));
    }

    #[tokio::test]
    async fn test_wrong_certificate_rejected() {
        let idp = TestIdp::generate();
        let impostor = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();
        let params = post(&provider, &impostor, Some(&init.state), &[]);
        let err = provider.handle_callback(&params, None).await.unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "invalid_signature"));
    }

    #[tokio::test]
    async fn test_comment_wrapped_assertion_with_forged_sibling_rejected() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();

        let genuine = signed_response(
            &provider,
            &idp,
            Some(&init.state),
            "mallory@example.com",
            &[("User.email", "mallory@example.com")],
        );
        let signed_assertion = assertion_of(&genuine);
        let forged_assertion = signed_assertion
            .replace(r#"ID="_assertion-1""#, r#"ID="_evil""#)
            .replace("mallory@example.com", "victim@example.com");
        let wrapped = genuine.replacen(
            signed_assertion,
            &format!("<!--{signed_assertion}-->{forged_assertion}"),
            1,
        );

        let err = provider
            .handle_callback(&post_xml(&provider, &wrapped), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { .. }));
    }

    #[tokio::test]
    async fn test_wrapped_signed_assertion_with_forged_sibling_rejected() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();

        let genuine = signed_response(
            &provider,
            &idp,
            Some(&init.state),
            "mallory@example.com",
            &[("User.email", "mallory@example.com")],
        );
        let signed_assertion = assertion_of(&genuine);
        let forged_assertion = signed_assertion
            .replace(r#"ID="_assertion-1""#, r#"ID="_evil""#)
            .replace("mallory@example.com", "victim@example.com");
        let wrapped = genuine.replacen(
            signed_assertion,
            &format!("<samlp:Extensions>{signed_assertion}</samlp:Extensions>{forged_assertion}"),
            1,
        );

        let err = provider
            .handle_callback(&post_xml(&provider, &wrapped), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::ProviderAuthError { .. }));
    }

    #[tokio::test]
    async fn test_unsigned_attributes_outside_assertion_ignored() {
        let idp = TestIdp::generate();
        let provider = provider(ProviderType::Onelogin, &idp);
        let init = provider.initiate(&InitiateRequest::default()).await.unwrap();

        let genuine = signed_response(
            &provider,
            &idp,
            Some(&init.state),
            "alice@example.com",
            &[("User.email", "alice@example.com")],
        );
        let injected = genuine.replacen(
            "<samlp:Status>",
            concat!(
                r#"<saml:AttributeStatement xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">"#,
                r#"<saml:Attribute Name="User.email"><saml:AttributeValue>victim@example.com</saml:AttributeValue></saml:Attribute>"#,
                r#"</saml:AttributeStatement><samlp:Status>"#
            ),
            1,
        );

        let result = provider
            .handle_callback(&post_xml(&provider, &injected), None)
            .await
            .unwrap();
        assert_eq!(result.profile.email, "alice@example.com");
    }

    #[test]
    fn test_configured_mapping_wins() {
        let response = ParsedSamlResponse {
            attributes: [
                ("mail".to_string(), vec!["a@example.com".to_string()]),
                ("email".to_string(), vec!["b@example.com".to_string()]),
            ]
            .into_iter()
            .collect(),
            ..ParsedSamlResponse::default()
        };
        assert_eq!(
            first_attribute(&response, Some("mail"), &["email"]).as_deref(),
            Some("a@example.com")
        );
        assert_eq!(
            first_attribute(&response, None, &["email"]).as_deref(),
            Some("b@example.com")
        );
    }
}
