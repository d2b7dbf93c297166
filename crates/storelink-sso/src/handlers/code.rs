//! Sign-in by emailed code.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use storelink_core::TenantId;

use crate::error::{SsoError, SsoResult};
use crate::extractors::Client;
use crate::router::SsoState;
use crate::state::OTP_TTL;

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub tenant: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequestResponse {
    pub expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeVerifyRequest {
    pub tenant: String,
    pub email: String,
    pub code: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeVerifyResponse {
    pub redirect_url: String,
}

fn parse_tenant(tenant: &str) -> SsoResult<TenantId> {
    tenant
        .parse()
        .map_err(|_| SsoError::InvalidRequest("tenant must be a UUID".to_string()))
}

/// `POST /code {tenant, email}` → 202, whether or not the customer exists.
pub async fn request_code(
    State(state): State<SsoState>,
    Client(client): Client,
    Json(body): Json<CodeRequest>,
) -> SsoResult<Response> {
    let tenant_id = parse_tenant(&body.tenant)?;
    state
        .orchestrator
        .request_login_code(tenant_id, &body.email, &client)
        .await?;

    let response = CodeRequestResponse {
        expires_in: OTP_TTL.as_secs(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// `POST /code/verify {tenant, email, code, returnTo}` → `{redirectUrl}`.
///
/// The caller is a storefront script, so the completion URL is returned
/// instead of redirected to.
pub async fn verify_code(
    State(state): State<SsoState>,
    Client(client): Client,
    Json(body): Json<CodeVerifyRequest>,
) -> SsoResult<Response> {
    let tenant_id = parse_tenant(&body.tenant)?;
    let outcome = state
        .orchestrator
        .complete_code_login(
            tenant_id,
            &body.email,
            &body.code,
            body.return_to.as_deref(),
            &client,
        )
        .await?;

    let redirect_url = state.orchestrator.completion_url(&outcome)?;
    tracing::info!(method = outcome.method.as_str(), "Login code accepted");
    Ok(Json(CodeVerifyResponse { redirect_url }).into_response())
}
