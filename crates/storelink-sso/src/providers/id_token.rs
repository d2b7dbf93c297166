//! ID token verification.
//!
//! Claim checks (`aud`, `nonce`, `exp`, `iss`) always run. Signature
//! verification against the IdP JWKS runs in [`IdTokenVerification::Jwks`]
//! mode; [`IdTokenVerification::TrustTokenEndpoint`] relies on the ID token
//! having been received directly from the token endpoint over TLS.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use moka::sync::Cache;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::discovery::validate_url_not_internal;
use crate::error::{SsoError, SsoResult};

/// Maximum encoded payload segment size.
const MAX_ENCODED_PAYLOAD_SIZE: usize = 128 * 1024;

/// Maximum decoded payload size.
const MAX_DECODED_PAYLOAD_SIZE: usize = 64 * 1024;

/// Maximum JWKS response size.
const MAX_JWKS_SIZE: usize = 512 * 1024;

const JWKS_CACHE_TTL_SECS: u64 = 600;

const JWKS_CACHE_MAX_CAPACITY: u64 = 256;

/// A JWKS younger than this is not refetched for an unknown `kid`.
pub const MIN_JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// How long a `kid` missing after a refresh is remembered as missing.
const UNKNOWN_KID_TTL_SECS: u64 = 300;

const UNKNOWN_KID_MAX_CAPACITY: u64 = 4096;

/// Clock skew leeway for `exp`.
pub const LEEWAY_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdTokenVerification {
    /// Verify the signature against the IdP JWKS.
    #[default]
    Jwks,
    /// Skip the signature; the token came straight from the token endpoint.
    TrustTokenEndpoint,
}

impl IdTokenVerification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jwks => "jwks",
            Self::TrustTokenEndpoint => "trust_token_endpoint",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jwks" => Some(Self::Jwks),
            "trust_token_endpoint" | "trust" => Some(Self::TrustTokenEndpoint),
            _ => None,
        }
    }
}

/// What the ID token must match.
#[derive(Debug, Clone, Copy)]
pub struct IdTokenExpectations<'a> {
    pub client_id: &'a str,
    /// Nonce stored with the redirect state.
    pub nonce: Option<&'a str>,
    /// Issuer, when discovery or static endpoints know it.
    pub issuer: Option<&'a str>,
    pub jwks_uri: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct IdTokenVerifier {
    http: reqwest::Client,
    mode: IdTokenVerification,
    jwks: Cache<String, CachedJwks>,
    /// `jwks_uri#kid` pairs that a fresh fetch did not contain.
    unknown_kids: Cache<String, ()>,
    min_refresh_interval: Duration,
    allow_internal_hosts: bool,
}

impl IdTokenVerifier {
    #[must_use]
    pub fn new(http: reqwest::Client, mode: IdTokenVerification) -> Self {
        Self {
            http,
            mode,
            jwks: Cache::builder()
                .max_capacity(JWKS_CACHE_MAX_CAPACITY)
                .time_to_live(Duration::from_secs(JWKS_CACHE_TTL_SECS))
                .build(),
            unknown_kids: Cache::builder()
                .max_capacity(UNKNOWN_KID_MAX_CAPACITY)
                .time_to_live(Duration::from_secs(UNKNOWN_KID_TTL_SECS))
                .build(),
            min_refresh_interval: MIN_JWKS_REFRESH_INTERVAL,
            allow_internal_hosts: false,
        }
    }

    /// Override [`MIN_JWKS_REFRESH_INTERVAL`].
    #[must_use]
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Permit JWKS URIs on plain HTTP or private hosts.
    #[must_use]
    pub fn allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }

    #[must_use]
    pub fn mode(&self) -> IdTokenVerification {
        self.mode
    }

    /// Verify `token` and return its claims.
    #[instrument(skip(self, token), fields(mode = self.mode.as_str()))]
    pub async fn verify(
        &self,
        token: &str,
        expected: &IdTokenExpectations<'_>,
    ) -> SsoResult<Map<String, Value>> {
        let claims = decode_payload(token)?;

        if self.mode == IdTokenVerification::Jwks {
            let jwks_uri = expected.jwks_uri.ok_or_else(|| {
                SsoError::ProviderNotConfigured(
                    "jwks_uri is required to verify ID token signatures".to_string(),
                )
            })?;
            self.verify_signature(token, jwks_uri).await?;
        }

        validate_claims(&claims, expected, chrono::Utc::now().timestamp())?;
        Ok(claims)
    }

    async fn verify_signature(&self, token: &str, jwks_uri: &str) -> SsoResult<()> {
        if !self.allow_internal_hosts {
            validate_url_not_internal(jwks_uri)
                .map_err(|e| SsoError::ProviderNotConfigured(format!("Blocked JWKS URI: {e}")))?;
        }

        let header = decode_header(token).map_err(|e| invalid_token(format!("bad header: {e}")))?;
        let kid = header.kid;
        let unknown_key = format!("{jwks_uri}#{}", kid.as_deref().unwrap_or_default());
        let no_key = || invalid_token(format!("no JWKS key for kid {kid:?}"));

        if self.unknown_kids.contains_key(&unknown_key) {
            return Err(no_key());
        }

        let jwks = match self.jwks.get(jwks_uri) {
            Some(cached) => cached,
            None => self.refresh_jwks(jwks_uri).await?,
        };

        let jwk = match select_key(&jwks.keys, kid.as_deref()) {
            Some(key) => key.clone(),
            None if jwks.fetched_at.elapsed() < self.min_refresh_interval => {
                debug!(kid = ?kid, "Unknown kid, JWKS too fresh to refetch");
                return Err(no_key());
            }
            None => {
                info!(kid = ?kid, jwks_uri = %jwks_uri, "Signing key not cached, refreshing JWKS");
                let refreshed = self.refresh_jwks(jwks_uri).await?;
                match select_key(&refreshed.keys, kid.as_deref()) {
                    Some(key) => key.clone(),
                    None => {
                        warn!(kid = ?kid, jwks_uri = %jwks_uri, "kid absent from refreshed JWKS");
                        self.unknown_kids.insert(unknown_key, ());
                        return Err(no_key());
                    }
                }
            }
        };

        // The algorithm comes from the JWK, never from the token header.
        let (key, algorithm) = build_decoding_key(&jwk)?;

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = LEEWAY_SECS.unsigned_abs();

        decode::<Value>(token, &key, &validation)
            .map_err(|e| invalid_token(format!("signature validation failed: {e}")))?;
        debug!("ID token signature verified");
        Ok(())
    }

    async fn refresh_jwks(&self, jwks_uri: &str) -> SsoResult<CachedJwks> {
        let cached = CachedJwks {
            keys: self.fetch_jwks(jwks_uri).await?,
            fetched_at: Instant::now(),
        };
        self.jwks.insert(jwks_uri.to_string(), cached.clone());
        Ok(cached)
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> SsoResult<JwkSet> {
        let unreachable =
            |reason: String| SsoError::ProviderUnreachable(format!("JWKS fetch failed: {reason}"));

        let response = self
            .http
            .get(jwks_uri)
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
        if bytes.len() > MAX_JWKS_SIZE {
            return Err(unreachable(format!("response too large: {} bytes", bytes.len())));
        }

        serde_json::from_slice(&bytes).map_err(|e| unreachable(format!("invalid JWKS: {e}")))
    }
}

fn invalid_token(reason: String) -> SsoError {
    SsoError::ProviderAuthError {
        error: "invalid_id_token".to_string(),
        description: Some(reason),
    }
}

fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
        // Without a kid only an unambiguous single-key set is usable.
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn build_decoding_key(jwk: &Jwk) -> SsoResult<(DecodingKey, Algorithm)> {
    match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err(invalid_token("RSA JWK missing n or e".to_string()));
            };
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| invalid_token(format!("bad RSA JWK: {e}")))?;
            let alg = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                Some("PS256") => Algorithm::PS256,
                None | Some("RS256") => Algorithm::RS256,
                Some(other) => return Err(invalid_token(format!("unsupported JWK alg {other}"))),
            };
            Ok((key, alg))
        }
        "EC" => {
            let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                return Err(invalid_token("EC JWK missing x or y".to_string()));
            };
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| invalid_token(format!("bad EC JWK: {e}")))?;
            let alg = match jwk.alg.as_deref() {
                Some("ES384") => Algorithm::ES384,
                None | Some("ES256") => Algorithm::ES256,
                Some(other) => return Err(invalid_token(format!("unsupported JWK alg {other}"))),
            };
            Ok((key, alg))
        }
        other => Err(invalid_token(format!("unsupported JWK key type {other}"))),
    }
}

/// Decode the claims segment of a compact JWT without checking the signature.
pub(crate) fn decode_payload(token: &str) -> SsoResult<Map<String, Value>> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid_token("not a compact JWT".to_string()));
    };

    if payload.len() > MAX_ENCODED_PAYLOAD_SIZE {
        return Err(invalid_token("payload too large".to_string()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| invalid_token(format!("payload is not base64url: {e}")))?;
    if bytes.len() > MAX_DECODED_PAYLOAD_SIZE {
        return Err(invalid_token("payload too large".to_string()));
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(invalid_token("payload is not a JSON object".to_string())),
        Err(e) => Err(invalid_token(format!("payload is not JSON: {e}"))),
    }
}

/// `aud` may be a string or an array of strings.
fn audience_contains(aud: Option<&Value>, client_id: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == client_id,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    }
}

fn validate_claims(
    claims: &Map<String, Value>,
    expected: &IdTokenExpectations<'_>,
    now: i64,
) -> SsoResult<()> {
    if !audience_contains(claims.get("aud"), expected.client_id) {
        return Err(invalid_token("audience mismatch".to_string()));
    }

    if let Some(nonce) = expected.nonce {
        if claims.get("nonce").and_then(Value::as_str) != Some(nonce) {
            return Err(invalid_token("nonce mismatch".to_string()));
        }
    }

    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid_token("missing exp".to_string()))?;
    if exp + LEEWAY_SECS < now {
        return Err(invalid_token("token expired".to_string()));
    }

    if let Some(issuer) = expected.issuer {
        let iss = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
        if iss.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(invalid_token("issuer mismatch".to_string()));
        }
    }

    Ok(())
}
