//! Shared fixtures for storelink-sso integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use storelink_core::{ProviderId, TenantId};
use storelink_db::{SsoProvider, Tenant};
use storelink_sso::crypto::{PasswordGenerator, RelayStateSigner, SecretCodec};
use storelink_sso::models::{OidcConfig, PlatformCredentials, ProviderConfig, SamlConfig};
use storelink_sso::providers::{
    DiscoveryService, IdTokenVerification, IdTokenVerifier, ProviderDependencies,
    ProviderRegistry,
};
use storelink_sso::services::{
    AuthOrchestrator, CodeDelivery, CustomerDirectory, DeliveryError, DirectoryCustomer,
    DirectoryError, DirectoryFactory, InMemoryRecordStore, LoginCodeMessage, LoginStrategy,
    NewCustomer, OrchestratorSettings, PasswordUpdatePolicy,
};
use storelink_sso::state::{InMemoryEphemeralStore, StateService};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ENCRYPTION_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const PASSWORD_PEPPER: &[u8] = b"integration-test-pepper";
pub const RELAY_SECRET: &[u8] = b"integration-relay-secret";
pub const CALLBACK_BASE: &str = "https://sso.example.com";
pub const SHOP_DOMAIN: &str = "alice-shop.example.com";
pub const CLIENT_ID: &str = "client-123";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    FindByEmail(String),
    Create { email: String, tags: Vec<String> },
    UpdatePassword(i64),
    Get(i64),
}

/// Customer directory double that records every call.
#[derive(Default)]
pub struct RecordingDirectory {
    calls: Mutex<Vec<DirectoryCall>>,
    existing: Mutex<Option<DirectoryCustomer>>,
    fail_updates: Mutex<bool>,
    tokens_seen: Mutex<Vec<String>>,
}

impl RecordingDirectory {
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    pub fn set_existing(&self, id: i64, email: &str) {
        *self.existing.lock().unwrap() = Some(DirectoryCustomer {
            id,
            email: Some(email.to_string()),
            first_name: None,
            last_name: None,
            state: Some("enabled".into()),
            tags: String::new(),
        });
    }

    pub fn fail_updates(&self) {
        *self.fail_updates.lock().unwrap() = true;
    }

    fn push(&self, call: DirectoryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CustomerDirectory for RecordingDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryCustomer>, DirectoryError> {
        self.push(DirectoryCall::FindByEmail(email.to_string()));
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn create(&self, customer: NewCustomer) -> Result<DirectoryCustomer, DirectoryError> {
        self.push(DirectoryCall::Create {
            email: customer.email.clone(),
            tags: customer.tags.clone(),
        });
        Ok(DirectoryCustomer {
            id: 1001,
            email: Some(customer.email),
            first_name: customer.first_name,
            last_name: customer.last_name,
            state: Some("enabled".into()),
            tags: customer.tags.join(", "),
        })
    }

    async fn update_password(&self, customer_id: i64, _password: &str) -> Result<(), DirectoryError> {
        self.push(DirectoryCall::UpdatePassword(customer_id));
        if *self.fail_updates.lock().unwrap() {
            return Err(DirectoryError::Api {
                status: 422,
                message: "password rejected".into(),
            });
        }
        Ok(())
    }

    async fn get(&self, customer_id: i64) -> Result<Option<DirectoryCustomer>, DirectoryError> {
        self.push(DirectoryCall::Get(customer_id));
        Ok(None)
    }
}

/// Code delivery double that keeps every message.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<LoginCodeMessage>>,
    fail: Mutex<bool>,
}

impl RecordingDelivery {
    pub fn sent(&self) -> Vec<LoginCodeMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_code(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|m| m.code.clone())
    }

    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl CodeDelivery for RecordingDelivery {
    async fn deliver(&self, message: &LoginCodeMessage) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(message.clone());
        if *self.fail.lock().unwrap() {
            return Err(DeliveryError::Rejected(503));
        }
        Ok(())
    }
}

struct RecordingFactory(Arc<RecordingDirectory>);

impl DirectoryFactory for RecordingFactory {
    fn for_tenant(&self, _shop_domain: &str, access_token: &str) -> Arc<dyn CustomerDirectory> {
        self.0.tokens_seen.lock().unwrap().push(access_token.to_string());
        self.0.clone()
    }
}

pub struct Harness {
    pub orchestrator: Arc<AuthOrchestrator>,
    pub records: InMemoryRecordStore,
    pub state: StateService,
    pub codec: Arc<SecretCodec>,
    pub directory: Arc<RecordingDirectory>,
    pub codes: Arc<RecordingDelivery>,
    pub relay_state: RelayStateSigner,
    pub idp: MockServer,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(PasswordUpdatePolicy::BestEffort).await
    }

    pub async fn with_policy(policy: PasswordUpdatePolicy) -> Self {
        let idp = MockServer::start().await;
        let http = reqwest::Client::new();
        let state = StateService::new(Arc::new(InMemoryEphemeralStore::new()));
        let relay_state = RelayStateSigner::new(RELAY_SECRET).unwrap();
        let codec = Arc::new(SecretCodec::from_key_material(ENCRYPTION_KEY).unwrap());

        let registry = ProviderRegistry::new(ProviderDependencies {
            state: state.clone(),
            http: http.clone(),
            discovery: DiscoveryService::new(http.clone()).allow_internal_hosts(true),
            id_tokens: IdTokenVerifier::new(http.clone(), IdTokenVerification::TrustTokenEndpoint)
                .allow_internal_hosts(true),
            relay_state: relay_state.clone(),
        });

        let records = InMemoryRecordStore::new();
        let directory = Arc::new(RecordingDirectory::default());
        let strategy = LoginStrategy::new(
            PasswordGenerator::new(PASSWORD_PEPPER).unwrap(),
            state.clone(),
            policy,
        );

        let codes = Arc::new(RecordingDelivery::default());
        let orchestrator = AuthOrchestrator::new(
            Arc::new(registry),
            Arc::new(records.clone()),
            Arc::new(RecordingFactory(directory.clone())),
            codec.clone(),
            strategy,
            OrchestratorSettings::new(CALLBACK_BASE),
        )
        .with_code_delivery(codes.clone());

        Self {
            orchestrator: Arc::new(orchestrator),
            records,
            state,
            codec,
            directory,
            codes,
            relay_state,
            idp,
        }
    }

    /// Active non-Plus tenant with a storefront access token.
    pub async fn tenant(&self) -> TenantId {
        self.tenant_with(TenantOptions::default()).await
    }

    pub async fn tenant_with(&self, options: TenantOptions) -> TenantId {
        let now = Utc::now();
        let credentials_encrypted = options.access_token.map(|token| {
            self.codec
                .encrypt(&PlatformCredentials {
                    access_token: token.to_string(),
                })
                .unwrap()
        });
        let multipass_secret_encrypted = options
            .multipass_secret
            .map(|secret| self.codec.encrypt_str(secret).unwrap());

        let tenant = Tenant {
            id: Uuid::new_v4(),
            shop_domain: SHOP_DOMAIN.to_string(),
            status: options.status.to_string(),
            is_plus_tier: options.plus,
            credentials_encrypted,
            multipass_secret_encrypted,
            created_at: now,
            updated_at: now,
        };
        let id = TenantId::from_uuid(tenant.id);
        self.records.insert_tenant(tenant).await;
        id
    }

    /// OIDC config pointing every endpoint at the mock IdP.
    pub fn oidc_config(&self) -> OidcConfig {
        let base = self.idp.uri();
        OidcConfig {
            client_id: CLIENT_ID.into(),
            client_secret: "client-secret".into(),
            issuer_url: None,
            authorization_url: Some(format!("{base}/authorize")),
            token_url: Some(format!("{base}/token")),
            userinfo_url: Some(format!("{base}/userinfo")),
            jwks_uri: None,
            scopes: None,
        }
    }

    pub fn saml_config(&self) -> SamlConfig {
        SamlConfig {
            entry_point: format!("{}/saml/sso", self.idp.uri()),
            certificate: "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA".into(),
            idp_entity_id: None,
            sp_entity_id: None,
            attribute_mapping: Default::default(),
            allow_idp_initiated: false,
        }
    }

    pub async fn provider(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
        config: ProviderConfig,
    ) -> ProviderId {
        self.provider_with_status(tenant_id, provider_type, config, true, "active")
            .await
    }

    pub async fn provider_with_status(
        &self,
        tenant_id: TenantId,
        provider_type: &str,
        config: ProviderConfig,
        enabled: bool,
        status: &str,
    ) -> ProviderId {
        let now = Utc::now();
        let record = SsoProvider {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into_uuid(),
            provider_type: provider_type.to_string(),
            protocol: config.protocol().as_str().to_string(),
            enabled,
            status: status.to_string(),
            display_name: None,
            config_encrypted: self.codec.encrypt(&config).unwrap(),
            created_at: now,
            updated_at: now,
        };
        let id = ProviderId::from_uuid(record.id);
        self.records.insert_provider(record).await;
        id
    }

    /// Token endpoint returning an unsigned ID token for `nonce`, plus a
    /// userinfo endpoint.
    pub async fn mount_token_endpoints(&self, nonce: &str, email: &str) {
        let id_token = unsigned_id_token(&json!({
            "iss": self.idp.uri(),
            "sub": "google-sub-1",
            "aud": CLIENT_ID,
            "exp": Utc::now().timestamp() + 300,
            "iat": Utc::now().timestamp(),
            "nonce": nonce,
            "email": email,
            "given_name": "Alice",
            "family_name": "Example",
        }));

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "idp-access-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": id_token,
            })))
            .mount(&self.idp)
            .await;

        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "google-sub-1",
                "email": email,
            })))
            .mount(&self.idp)
            .await;
    }

    /// Number of requests the mock IdP has received.
    pub async fn idp_request_count(&self) -> usize {
        self.idp
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or_default()
    }
}

pub struct TenantOptions {
    pub status: &'static str,
    pub plus: bool,
    pub access_token: Option<&'static str>,
    pub multipass_secret: Option<&'static str>,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            status: "active",
            plus: false,
            access_token: Some("shpat_integration"),
            multipass_secret: None,
        }
    }
}

pub fn unsigned_id_token(claims: &serde_json::Value) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}
