//! OIDC discovery (`{issuer}/.well-known/openid-configuration`).

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::error::{SsoError, SsoResult};

/// Discovery documents are cached for an hour.
const DISCOVERY_CACHE_TTL_SECS: u64 = 3600;

const DISCOVERY_CACHE_MAX_CAPACITY: u64 = 1024;

/// Maximum accepted discovery document size.
const MAX_DISCOVERY_SIZE: usize = 256 * 1024;

/// Endpoints read from a provider's discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

#[derive(Clone)]
pub struct DiscoveryService {
    http: reqwest::Client,
    cache: Cache<String, Arc<DiscoveredEndpoints>>,
    allow_internal_hosts: bool,
}

impl DiscoveryService {
    /// `http` should carry the outbound timeout and a no-redirect policy.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: Cache::builder()
                .max_capacity(DISCOVERY_CACHE_MAX_CAPACITY)
                .time_to_live(Duration::from_secs(DISCOVERY_CACHE_TTL_SECS))
                .build(),
            allow_internal_hosts: false,
        }
    }

    /// Permit plain HTTP and private hosts (local development and tests).
    #[must_use]
    pub fn allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }

    #[must_use]
    pub fn well_known_url(issuer_url: &str) -> String {
        let issuer_url = issuer_url.trim_end_matches('/');
        format!("{issuer_url}/.well-known/openid-configuration")
    }

    /// Apply the SSRF policy to an outbound IdP URL.
    pub fn check_url(&self, url: &str) -> SsoResult<()> {
        if self.allow_internal_hosts {
            return Ok(());
        }
        validate_url_not_internal(url)
            .map_err(|e| SsoError::ProviderNotConfigured(format!("Blocked IdP URL: {e}")))
    }

    /// Fetch (or reuse) the discovery document for `issuer_url`.
    ///
    /// Transport and parse failures are `ProviderUnreachable`; there is no
    /// fallback. A document naming another issuer is `ProviderNotConfigured`.
    #[instrument(skip(self), fields(issuer = %issuer_url))]
    pub async fn discover(&self, issuer_url: &str) -> SsoResult<Arc<DiscoveredEndpoints>> {
        let issuer_url = issuer_url.trim_end_matches('/');
        if let Some(cached) = self.cache.get(issuer_url) {
            return Ok(cached);
        }

        self.check_url(issuer_url)?;
        let url = Self::well_known_url(issuer_url);

        let unreachable = |message: String| {
            SsoError::ProviderUnreachable(format!("discovery for {issuer_url} failed: {message}"))
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        if bytes.len() > MAX_DISCOVERY_SIZE {
            return Err(unreachable(format!("document too large: {} bytes", bytes.len())));
        }

        let endpoints: DiscoveredEndpoints =
            serde_json::from_slice(&bytes).map_err(|e| unreachable(e.to_string()))?;

        if endpoints.issuer.trim_end_matches('/') != issuer_url {
            tracing::warn!(
                document_issuer = %endpoints.issuer,
                "Discovery document issuer does not match configured issuer"
            );
            return Err(SsoError::ProviderNotConfigured(format!(
                "discovery document for {issuer_url} names issuer {}",
                endpoints.issuer
            )));
        }

        tracing::info!(
            authorization_endpoint = %endpoints.authorization_endpoint,
            token_endpoint = %endpoints.token_endpoint,
            "Discovered OIDC endpoints"
        );

        let endpoints = Arc::new(endpoints);
        self.cache.insert(issuer_url.to_string(), endpoints.clone());
        Ok(endpoints)
    }
}

/// Reject non-HTTPS URLs and URLs that target loopback, private or metadata
/// hosts.
pub(crate) fn validate_url_not_internal(url_str: &str) -> Result<(), String> {
    let url = url::Url::parse(url_str).map_err(|e| format!("Invalid URL: {e}"))?;

    if url.scheme() != "https" {
        return Err(format!("Only HTTPS is allowed for IdP URLs, got: {}", url.scheme()));
    }

    let host = url.host_str().ok_or_else(|| "URL has no host".to_string())?;
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        let internal = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_unspecified()
                    || v4.is_documentation()
            }
            IpAddr::V6(v6) => {
                let first = v6.segments()[0];
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (first & 0xfe00) == 0xfc00
                    || (first & 0xffc0) == 0xfe80
            }
        };
        if internal {
            return Err(format!("Internal/private IP not allowed: {host}"));
        }
    } else {
        let lower = host.to_lowercase();
        for blocked in ["localhost", "metadata.google.internal", "metadata.goog"] {
            if lower == blocked || lower.ends_with(&format!(".{blocked}")) {
                return Err(format!("Blocked hostname: {host}"));
            }
        }
    }

    Ok(())
}
