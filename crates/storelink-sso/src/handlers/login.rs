//! Login initiation.

use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use storelink_core::TenantId;

use super::found;
use crate::error::{SsoError, SsoResult};
use crate::extractors::Client;
use crate::models::InitiateRequest;
use crate::router::SsoState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginQuery {
    pub tenant: String,
    pub provider: String,
    #[serde(default)]
    pub return_to: Option<String>,
    /// Admin test flow; may run against a provider that is still pending setup.
    #[serde(default)]
    pub test: bool,
}

/// `GET /login?tenant&provider&returnTo` → 302 to the IdP.
pub async fn login(
    State(state): State<SsoState>,
    Client(client): Client,
    Query(query): Query<LoginQuery>,
) -> SsoResult<Response> {
    let tenant_id: TenantId = query
        .tenant
        .parse()
        .map_err(|_| SsoError::InvalidRequest("tenant must be a UUID".to_string()))?;

    let request = InitiateRequest {
        return_to: query.return_to,
        test_mode: query.test,
    };
    let result = state
        .orchestrator
        .initiate_login(tenant_id, &query.provider, &request, &client)
        .await?;

    found(&result.redirect_url)
}
