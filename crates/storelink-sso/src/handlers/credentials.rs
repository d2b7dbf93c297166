//! One-time credential hand-off.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::error::{ErrorResponse, SsoResult};
use crate::router::SsoState;

#[derive(Debug, Deserialize)]
pub struct CredentialsQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /credentials?token=` → `{email, password, returnTo}` exactly once.
pub async fn credentials(
    State(state): State<SsoState>,
    Query(query): Query<CredentialsQuery>,
) -> SsoResult<Response> {
    let Some(handoff) = state.orchestrator.redeem_handoff(&query.token).await? else {
        let body = ErrorResponse {
            error: "not_found".to_string(),
            message: "Credentials expired or already used".to_string(),
        };
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };

    let mut response = Json(handoff).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
