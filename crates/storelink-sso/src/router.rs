//! Router configuration for the SSO endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::services::AuthOrchestrator;

/// Shared state for SSO handlers.
#[derive(Clone)]
pub struct SsoState {
    pub orchestrator: Arc<AuthOrchestrator>,
}

impl SsoState {
    #[must_use]
    pub fn new(orchestrator: Arc<AuthOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Public SSO routes. Tenant context comes from the query string, the
/// redirect state or the signed RelayState.
pub fn sso_router() -> Router<SsoState> {
    Router::new()
        .route("/login", get(handlers::login))
        .route(
            "/oidc/:provider_type/callback",
            get(handlers::oidc_callback_get).post(handlers::oidc_callback_post),
        )
        .route("/saml/:provider_type/callback", post(handlers::saml_callback))
        .route("/code", post(handlers::request_code))
        .route("/code/verify", post(handlers::verify_code))
        .route("/credentials", get(handlers::credentials))
        .route("/health", get(handlers::health))
}
