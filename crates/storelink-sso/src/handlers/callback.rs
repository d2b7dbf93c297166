//! IdP callbacks.
//!
//! A successful callback always ends in a redirect to the storefront: the
//! multipass URL, or the storefront login page carrying a hand-off token.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Form,
};
use tracing::info;

use super::found;
use crate::error::SsoResult;
use crate::extractors::Client;
use crate::models::{CallbackParams, ClientContext, LoginOutcome};
use crate::router::SsoState;

/// `GET /oidc/:provider_type/callback`
pub async fn oidc_callback_get(
    State(state): State<SsoState>,
    Path(provider_type): Path<String>,
    Client(client): Client,
    Query(params): Query<CallbackParams>,
) -> SsoResult<Response> {
    oidc_callback(&state, &provider_type, &params, &client).await
}

/// `POST /oidc/:provider_type/callback` (`response_mode=form_post`).
pub async fn oidc_callback_post(
    State(state): State<SsoState>,
    Path(provider_type): Path<String>,
    Client(client): Client,
    Form(params): Form<CallbackParams>,
) -> SsoResult<Response> {
    oidc_callback(&state, &provider_type, &params, &client).await
}

async fn oidc_callback(
    state: &SsoState,
    provider_type: &str,
    params: &CallbackParams,
    client: &ClientContext,
) -> SsoResult<Response> {
    let outcome = state
        .orchestrator
        .resolve_oidc_callback(provider_type, params, client)
        .await?;
    finish(state, &outcome)
}

/// `POST /saml/:provider_type/callback`
pub async fn saml_callback(
    State(state): State<SsoState>,
    Path(provider_type): Path<String>,
    Client(client): Client,
    Form(params): Form<CallbackParams>,
) -> SsoResult<Response> {
    let outcome = state
        .orchestrator
        .resolve_saml_callback(&provider_type, &params, &client)
        .await?;
    finish(&state, &outcome)
}

fn finish(state: &SsoState, outcome: &LoginOutcome) -> SsoResult<Response> {
    let location = state.orchestrator.completion_url(outcome)?;
    info!(
        link_id = ?outcome.link_id,
        method = outcome.method.as_str(),
        "Redirecting customer to storefront"
    );
    found(&location)
}
