//! Axum extractors for SSO handlers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::IpAddr;

use crate::models::ClientContext;

/// Maximum User-Agent length stored on audit events.
const MAX_USER_AGENT_LEN: usize = 512;

/// Client metadata for the audit trail.
///
/// `X-Forwarded-For` is only trustworthy behind a proxy that overwrites it;
/// the value is recorded, never used for access decisions.
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientContext);

#[async_trait]
impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(ClientContext {
            ip_address: extract_client_ip(&parts.headers).map(|ip| ip.to_string()),
            user_agent: extract_user_agent(&parts.headers),
        }))
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse().ok())
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(MAX_USER_AGENT_LEN).collect())
}
