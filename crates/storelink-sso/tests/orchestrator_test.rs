//! End-to-end login attempts through the auth orchestrator.

mod common;

use common::{DirectoryCall, Harness, TenantOptions, SHOP_DOMAIN};
use storelink_core::{LinkId, ProviderId, TenantId};
use storelink_db::{LinkStatus, LoginEventKind, UpsertCustomerSsoLink};
use storelink_sso::models::{
    CallbackParams, ClientContext, InitiateRequest, InitiateResult, LoginMethod, OidcConfig,
    ProviderConfig,
};
use storelink_sso::services::{PasswordUpdatePolicy, RecordStore};
use storelink_sso::SsoError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const EMAIL: &str = "alice@example.com";

fn client() -> ClientContext {
    ClientContext {
        ip_address: Some("203.0.113.9".into()),
        user_agent: Some("integration-test".into()),
    }
}

async fn google_tenant(h: &Harness, options: TenantOptions) -> (TenantId, ProviderId) {
    let tenant_id = h.tenant_with(options).await;
    let provider_id = h
        .provider(tenant_id, "google", ProviderConfig::Oidc(h.oidc_config()))
        .await;
    (tenant_id, provider_id)
}

async fn initiate(h: &Harness, tenant_id: TenantId, request: InitiateRequest) -> InitiateResult {
    let result = h
        .orchestrator
        .initiate_login(tenant_id, "google", &request, &client())
        .await
        .unwrap();
    h.mount_token_endpoints(result.nonce.as_deref().unwrap(), EMAIL)
        .await;
    result
}

fn callback_params(state: &str) -> CallbackParams {
    CallbackParams {
        code: Some("auth-code".into()),
        state: Some(state.to_string()),
        ..Default::default()
    }
}

async fn events_of(h: &Harness, kind: LoginEventKind) -> Vec<storelink_db::LoginEvent> {
    h.records
        .events()
        .await
        .into_iter()
        .filter(|e| e.kind() == kind)
        .collect()
}

#[tokio::test]
async fn test_oidc_happy_path_uses_password_handoff() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;

    let started = initiate(
        &h,
        tenant_id,
        InitiateRequest {
            return_to: Some("/account/orders".into()),
            test_mode: false,
        },
    )
    .await;
    assert!(started.redirect_url.starts_with(&format!("{}/authorize?", h.idp.uri())));

    let outcome = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.method, LoginMethod::Password);
    assert_eq!(outcome.email, EMAIL);
    assert_eq!(outcome.return_to, "/account/orders");
    assert!(outcome.redirect_url.is_none());

    let successes = events_of(&h, LoginEventKind::Success).await;
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].link_id, outcome.link_id.map(LinkId::into_uuid));
    assert_eq!(successes[0].ip_address.as_deref(), Some("203.0.113.9"));
    assert!(events_of(&h, LoginEventKind::Failed).await.is_empty());

    assert_eq!(
        h.directory.calls(),
        vec![
            DirectoryCall::FindByEmail(EMAIL.into()),
            DirectoryCall::Create {
                email: EMAIL.into(),
                tags: vec!["sso".into(), "google".into()],
            },
        ]
    );
    assert_eq!(h.directory.tokens_seen(), vec!["shpat_integration".to_string()]);

    let token = outcome.handoff_token.clone().unwrap();
    let location = h.orchestrator.completion_url(&outcome).unwrap();
    assert_eq!(
        location,
        format!("https://{SHOP_DOMAIN}/account/login/sso?token={token}")
    );

    let handoff = h.orchestrator.redeem_handoff(&token).await.unwrap().unwrap();
    assert_eq!(handoff.email, EMAIL);
    assert_eq!(handoff.return_to, "/account/orders");
    assert!(!handoff.password.is_empty());
    assert!(h.orchestrator.redeem_handoff(&token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_state_replay_is_invalid_state() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;
    let params = callback_params(&started.state);

    h.orchestrator
        .resolve_oidc_callback("google", &params, &client())
        .await
        .unwrap();
    let calls_after_first = h.directory.calls().len();

    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &params, &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::InvalidState));
    assert_eq!(h.directory.calls().len(), calls_after_first);
    assert_eq!(events_of(&h, LoginEventKind::Success).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_callbacks_consume_state_once() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;
    let params = callback_params(&started.state);

    let (client_a, client_b) = (client(), client());
    let (a, b) = tokio::join!(
        h.orchestrator.resolve_oidc_callback("google", &params, &client_a),
        h.orchestrator.resolve_oidc_callback("google", &params, &client_b),
    );

    let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(oks, 1);
    let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(err, SsoError::InvalidState));
}

#[tokio::test]
async fn test_plus_tenant_with_secret_uses_multipass() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(
        &h,
        TenantOptions {
            plus: true,
            multipass_secret: Some("multipass-shared-secret"),
            ..Default::default()
        },
    )
    .await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;

    let outcome = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap();

    assert_eq!(outcome.method, LoginMethod::Multipass);
    let redirect = outcome.redirect_url.clone().unwrap();
    assert!(redirect.starts_with(&format!("https://{SHOP_DOMAIN}/account/login/multipass/")));
    assert!(outcome.handoff_token.is_none());
    assert!(h.directory.calls().is_empty());
    assert_eq!(h.orchestrator.completion_url(&outcome).unwrap(), redirect);
}

#[tokio::test]
async fn test_blocked_user_never_reaches_directory() {
    let h = Harness::new().await;
    let (tenant_id, provider_id) = google_tenant(&h, TenantOptions::default()).await;

    let link = h
        .records
        .upsert_link(UpsertCustomerSsoLink {
            tenant_id: tenant_id.into_uuid(),
            provider_id: provider_id.into_uuid(),
            external_id: "google-sub-1".into(),
            email: EMAIL.into(),
            first_name: None,
            last_name: None,
        })
        .await
        .unwrap();
    h.records
        .set_link_status(LinkId::from_uuid(link.id), LinkStatus::Blocked)
        .await;

    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;
    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::UserBlocked));
    assert!(h.directory.calls().is_empty());

    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_code.as_deref(), Some("USER_BLOCKED"));
    assert_eq!(failed[0].link_id, Some(link.id));
    assert!(events_of(&h, LoginEventKind::Success).await.is_empty());
}

#[tokio::test]
async fn test_unknown_provider_type() {
    let h = Harness::new().await;
    let tenant_id = h.tenant().await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "not-a-real-type", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::UnknownProvider(ref t) if t == "not-a-real-type"));

    let err = h
        .orchestrator
        .resolve_oidc_callback("not-a-real-type", &callback_params("x"), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::UnknownProvider(_)));
}

#[tokio::test]
async fn test_tenant_without_access_token_fails_before_idp() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(
        &h,
        TenantOptions {
            access_token: None,
            ..Default::default()
        },
    )
    .await;

    let started = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::MissingStoreCredentials(id) if id == tenant_id));
    assert_eq!(h.idp_request_count().await, 0);
    assert!(h.directory.calls().is_empty());

    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_code.as_deref(), Some("MISSING_STORE_CREDENTIALS"));
}

#[tokio::test]
async fn test_strict_policy_surfaces_directory_error() {
    let h = Harness::with_policy(PasswordUpdatePolicy::Strict).await;
    h.directory.set_existing(42, EMAIL);
    h.directory.fail_updates();
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;

    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::DirectoryError { status: Some(422), .. }));
    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed[0].error_code.as_deref(), Some("DIRECTORY_ERROR"));
}

#[tokio::test]
async fn test_best_effort_policy_continues_after_update_failure() {
    let h = Harness::new().await;
    h.directory.set_existing(42, EMAIL);
    h.directory.fail_updates();
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;

    let outcome = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap();

    assert_eq!(outcome.method, LoginMethod::Password);
    assert!(h.directory.calls().contains(&DirectoryCall::UpdatePassword(42)));
}

#[tokio::test]
async fn test_discovery_failure_is_provider_unreachable() {
    let h = Harness::new().await;
    let tenant_id = h.tenant().await;

    Mock::given(method("GET"))
        .and(path("/broken/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.idp)
        .await;

    let config = OidcConfig {
        issuer_url: Some(format!("{}/broken", h.idp.uri())),
        authorization_url: None,
        token_url: None,
        userinfo_url: None,
        ..h.oidc_config()
    };
    h.provider(tenant_id, "custom", ProviderConfig::Oidc(config))
        .await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "custom", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::ProviderUnreachable(_)));
    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_code.as_deref(), Some("PROVIDER_UNREACHABLE"));
}

#[tokio::test]
async fn test_idp_error_is_recorded() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;

    let params = CallbackParams {
        state: Some(started.state.clone()),
        error: Some("access_denied".into()),
        error_description: Some("user cancelled".into()),
        ..Default::default()
    };
    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &params, &client())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::ProviderAuthError { ref error, .. } if error == "access_denied"));
    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed[0].error_code.as_deref(), Some("PROVIDER_AUTH_ERROR"));

    // The state was burned by the failed attempt.
    let err = h
        .orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::InvalidState));
}

#[tokio::test]
async fn test_callback_path_must_match_state_provider() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(&h, TenantOptions::default()).await;
    let started = initiate(&h, tenant_id, InitiateRequest::default()).await;

    let err = h
        .orchestrator
        .resolve_oidc_callback("microsoft", &callback_params(&started.state), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::InvalidState));

    let failed = events_of(&h, LoginEventKind::Failed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].tenant_id, tenant_id.into_uuid());
    assert_eq!(failed[0].error_code.as_deref(), Some("INVALID_STATE"));
    assert_eq!(h.idp_request_count().await, 0);
}

#[tokio::test]
async fn test_saml_type_on_oidc_path_is_rejected() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .resolve_oidc_callback("okta", &callback_params("x"), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_inactive_tenant_is_rejected() {
    let h = Harness::new().await;
    let (tenant_id, _) = google_tenant(
        &h,
        TenantOptions {
            status: "suspended",
            ..Default::default()
        },
    )
    .await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::TenantInactive(_)));
    assert_eq!(
        events_of(&h, LoginEventKind::Failed).await[0].error_code.as_deref(),
        Some("TENANT_INACTIVE")
    );
}

#[tokio::test]
async fn test_unknown_tenant_records_nothing() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .initiate_login(TenantId::new(), "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::TenantNotFound(_)));
    assert!(h.records.events().await.is_empty());
}

#[tokio::test]
async fn test_missing_and_disabled_providers() {
    let h = Harness::new().await;
    let tenant_id = h.tenant().await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::ProviderNotConfigured(_)));

    h.provider_with_status(
        tenant_id,
        "google",
        ProviderConfig::Oidc(h.oidc_config()),
        false,
        "disabled",
    )
    .await;
    let err = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::ProviderDisabled(_)));
}

#[tokio::test]
async fn test_pending_provider_is_activated_by_test_login() {
    let h = Harness::new().await;
    let tenant_id = h.tenant().await;
    let provider_id = h
        .provider_with_status(
            tenant_id,
            "google",
            ProviderConfig::Oidc(h.oidc_config()),
            false,
            "pending_setup",
        )
        .await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::ProviderDisabled(_)));

    let started = initiate(
        &h,
        tenant_id,
        InitiateRequest {
            return_to: None,
            test_mode: true,
        },
    )
    .await;
    h.orchestrator
        .resolve_oidc_callback("google", &callback_params(&started.state), &client())
        .await
        .unwrap();

    assert!(h.records.provider(provider_id).await.unwrap().is_usable());
}

#[tokio::test]
async fn test_undecryptable_config_is_reported() {
    let h = Harness::new().await;
    let tenant_id = h.tenant().await;
    let provider_id = h
        .provider(tenant_id, "google", ProviderConfig::Oidc(h.oidc_config()))
        .await;

    let mut record = h.records.provider(provider_id).await.unwrap();
    record.config_encrypted = "v1:AAAA:BBBB:CCCC".into();
    h.records.insert_provider(record).await;

    let err = h
        .orchestrator
        .initiate_login(tenant_id, "google", &InitiateRequest::default(), &client())
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::ConfigDecryptionError(_)));
}
