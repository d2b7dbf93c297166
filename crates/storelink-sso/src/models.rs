//! Domain types shared by providers, the orchestrator and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storelink_core::LinkId;

use crate::error::SsoError;

/// Identity provider type token, as stored on provider records and used in
/// callback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Google,
    Microsoft,
    Facebook,
    Auth0,
    Custom,
    CustomOauth,
    Okta,
    Azure,
    Onelogin,
    Salesforce,
}

impl ProviderType {
    pub const ALL: [ProviderType; 10] = [
        Self::Google,
        Self::Microsoft,
        Self::Facebook,
        Self::Auth0,
        Self::Custom,
        Self::CustomOauth,
        Self::Okta,
        Self::Azure,
        Self::Onelogin,
        Self::Salesforce,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Facebook => "facebook",
            Self::Auth0 => "auth0",
            Self::Custom => "custom",
            Self::CustomOauth => "custom_oauth",
            Self::Okta => "okta",
            Self::Azure => "azure",
            Self::Onelogin => "onelogin",
            Self::Salesforce => "salesforce",
        }
    }

    /// Parse a provider type token. Returns `None` for unknown tokens.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = SsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| SsoError::UnknownProvider(s.to_string()))
    }
}

/// Federation protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Oidc,
    Saml,
}

impl Protocol {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Saml => "saml",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oidc" => Some(Self::Oidc),
            "saml" => Some(Self::Saml),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decrypted provider configuration. Exactly one protocol variant per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProviderConfig {
    Oidc(OidcConfig),
    Saml(SamlConfig),
}

impl ProviderConfig {
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Oidc(_) => Protocol::Oidc,
            Self::Saml(_) => Protocol::Saml,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub authorization_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("issuer_url", &self.issuer_url)
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("jwks_uri", &self.jwks_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlConfig {
    /// IdP single sign-on URL.
    pub entry_point: String,
    /// IdP signing certificate, PEM or bare base64 DER.
    pub certificate: String,
    /// IdP entity id; when set, the response `Issuer` must match.
    #[serde(default, alias = "issuer")]
    pub idp_entity_id: Option<String>,
    /// Our entity id; defaults to the callback URL.
    #[serde(default)]
    pub sp_entity_id: Option<String>,
    #[serde(default)]
    pub attribute_mapping: AttributeMapping,
    /// Accept responses without `InResponseTo`.
    #[serde(default)]
    pub allow_idp_initiated: bool,
}

/// Attribute names to read from a SAML assertion. Unset names fall back to
/// the vendor defaults for the provider type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

/// Protocol-agnostic identity produced by a successful callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Full claim / attribute set as received.
    pub raw: serde_json::Value,
}

impl NormalizedProfile {
    /// Best display name: explicit name, then first + last, then email.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

/// Query or form parameters delivered to a callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InitiateRequest {
    pub return_to: Option<String>,
    pub test_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiateResult {
    pub redirect_url: String,
    /// OIDC `state` or SAML request id.
    pub state: String,
    pub nonce: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub profile: NormalizedProfile,
    pub tokens: Option<TokenSet>,
    pub return_to: Option<String>,
    pub test_mode: bool,
}

/// Client metadata recorded on audit events.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// How the downstream storefront session was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    Multipass,
    Password,
}

impl LoginMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multipass => "multipass",
            Self::Password => "password",
        }
    }
}

/// Result of a completed callback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub success: bool,
    pub method: LoginMethod,
    pub email: String,
    /// Ready-to-follow storefront URL (multipass only).
    pub redirect_url: Option<String>,
    /// One-time credential hand-off token (password only).
    pub handoff_token: Option<String>,
    pub return_to: String,
    /// Absent for login-code sign-ins, which have no provider link.
    pub link_id: Option<LinkId>,
    pub shop_domain: String,
}

/// Decrypted storefront platform credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformCredentials {
    pub access_token: String,
}

impl fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("access_token", &"[redacted]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_tokens() {
        for t in ProviderType::ALL {
            assert_eq!(ProviderType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ProviderType::CustomOauth.as_str(), "custom_oauth");
        assert!(ProviderType::parse("not-a-real-type").is_none());
    }

    #[test]
    fn test_from_str_unknown_is_typed_error() {
        let err = "github".parse::<ProviderType>().unwrap_err();
        assert!(matches!(err, SsoError::UnknownProvider(t) if t == "github"));
    }

    #[test]
    fn test_provider_config_is_tagged_by_protocol() {
        let json = serde_json::json!({
            "protocol": "saml",
            "entry_point": "https://idp.example.com/sso",
            "certificate": "MIIB"
        });
        let config: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.protocol(), Protocol::Saml);
        match config {
            ProviderConfig::Saml(saml) => {
                assert!(!saml.allow_idp_initiated);
                assert_eq!(saml.attribute_mapping, AttributeMapping::default());
            }
            ProviderConfig::Oidc(_) => panic!("expected SAML config"),
        }
    }

    #[test]
    fn test_oidc_debug_redacts_secret() {
        let config = OidcConfig {
            client_id: "client".into(),
            client_secret: "hunter2".into(),
            issuer_url: None,
            authorization_url: None,
            token_url: None,
            userinfo_url: None,
            jwks_uri: None,
            scopes: None,
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut profile = NormalizedProfile {
            external_id: "1".into(),
            email: "a@example.com".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            display_name: None,
            avatar_url: None,
            raw: serde_json::Value::Null,
        };
        assert_eq!(profile.display_name(), "Ada Lovelace");
        profile.first_name = None;
        profile.last_name = None;
        assert_eq!(profile.display_name(), "a@example.com");
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = LoginOutcome {
            success: true,
            method: LoginMethod::Password,
            email: "a@example.com".into(),
            redirect_url: None,
            handoff_token: Some("t".into()),
            return_to: "/".into(),
            link_id: Some(LinkId::new()),
            shop_domain: "shop.example.com".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["method"], "password");
        assert_eq!(json["handoffToken"], "t");
        assert_eq!(json["returnTo"], "/");
    }
}
