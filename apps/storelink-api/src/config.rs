//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing or malformed value stops startup with a
//! clear message. In production mode the development defaults for keys and
//! secrets are refused.

use std::env;
use std::time::Duration;
use storelink_sso::crypto::SecretCodec;
use storelink_sso::providers::IdTokenVerification;
use storelink_sso::services::{
    PasswordUpdatePolicy, DEFAULT_STOREFRONT_LOGIN_PATH, MIN_WEBHOOK_SECRET_LEN,
};
use thiserror::Error;

/// Development ENCRYPTION_KEY: 64 hex '0' characters.
pub const INSECURE_ENCRYPTION_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub const INSECURE_RELAY_STATE_SECRET: &str =
    "development-relay-state-secret-change-in-production";

pub const INSECURE_PASSWORD_PEPPER: &str = "development-password-pepper-change-in-production";

const DEFAULT_PLATFORM_API_VERSION: &str = "2024-01";

/// Application environment mode.
///
/// - `Development`: insecure defaults are allowed with WARN-level logging.
/// - `Production`: insecure defaults cause the application to refuse startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse an `APP_ENV` value. Defaults to `Development` if unrecognized.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Where redirect state, hand-offs and codes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Memory,
    Postgres,
}

impl StateBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Webhook that emails login codes.
#[derive(Clone)]
pub struct LoginCodeWebhook {
    pub url: String,
    pub secret: String,
}

#[derive(Clone)]
pub struct Config {
    pub app_env: AppEnvironment,

    /// Required when either store is Postgres.
    pub database_url: Option<String>,

    pub bind_addr: String,

    /// Public base URL of this service; IdP callbacks are built from it.
    pub public_base_url: String,

    /// 32-byte key as 64 hex characters or base64.
    pub encryption_key: String,

    pub relay_state_secret: String,
    pub password_pepper: String,
    pub http_timeout: Duration,
    pub platform_api_version: String,
    pub password_update_policy: PasswordUpdatePolicy,
    pub id_token_verification: IdTokenVerification,
    pub state_backend: StateBackend,
    pub storefront_login_path: String,
    /// Login codes are disabled when unset.
    pub login_code_webhook: Option<LoginCodeWebhook>,
    pub rust_log: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("app_env", &self.app_env)
            .field("database_url", &self.database_url.as_ref().map(|_| "[redacted]"))
            .field("bind_addr", &self.bind_addr)
            .field("public_base_url", &self.public_base_url)
            .field("http_timeout", &self.http_timeout)
            .field("platform_api_version", &self.platform_api_version)
            .field("password_update_policy", &self.password_update_policy)
            .field("id_token_verification", &self.id_token_verification)
            .field("state_backend", &self.state_backend)
            .field("storefront_login_path", &self.storefront_login_path)
            .field(
                "login_code_webhook",
                &self.login_code_webhook.as_ref().map(|w| &w.url),
            )
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    ///
    /// # Optional Variables
    ///
    /// - `APP_ENV` - `development` (default) or `production`
    /// - `DATABASE_URL` - PostgreSQL connection string; required for `STATE_BACKEND=postgres`
    /// - `BIND_ADDR` - listen address (default: "0.0.0.0:8080")
    /// - `PUBLIC_BASE_URL` - callback base (default: "http://localhost:8080")
    /// - `ENCRYPTION_KEY`, `RELAY_STATE_SECRET`, `PASSWORD_PEPPER` - secrets
    /// - `HTTP_TIMEOUT_SECS` - outbound timeout (default: 10)
    /// - `PLATFORM_API_VERSION` - storefront Admin API version (default: "2024-01")
    /// - `PASSWORD_UPDATE_POLICY` - `best_effort` (default) or `strict`
    /// - `ID_TOKEN_VERIFICATION` - `jwks` (default) or `trust_token_endpoint`
    /// - `STATE_BACKEND` - `memory` (default) or `postgres`
    /// - `STOREFRONT_LOGIN_PATH` - hand-off page (default: "/account/login/sso")
    /// - `LOGIN_CODE_WEBHOOK_URL`, `LOGIN_CODE_WEBHOOK_SECRET` - enable login
    ///   codes; set both or neither
    /// - `RUST_LOG` - log filter (default: "info,storelink=debug")
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development only)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let app_env = AppEnvironment::from_env_str(
            &var("APP_ENV").unwrap_or_else(|| "development".to_string()),
        );

        let database_url = var("DATABASE_URL");
        let state_backend = match var("STATE_BACKEND") {
            Some(raw) => StateBackend::parse(&raw)
                .ok_or_else(|| ConfigError::invalid("STATE_BACKEND", "expected memory or postgres"))?,
            None => StateBackend::Memory,
        };
        if state_backend == StateBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        if bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid("BIND_ADDR", "expected host:port"));
        }

        let public_base_url =
            var("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());
        if !public_base_url.starts_with("http://") && !public_base_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "PUBLIC_BASE_URL",
                "must be an absolute http(s) URL",
            ));
        }

        let encryption_key =
            var("ENCRYPTION_KEY").unwrap_or_else(|| INSECURE_ENCRYPTION_KEY.to_string());
        SecretCodec::from_key_material(&encryption_key)
            .map_err(|e| ConfigError::invalid("ENCRYPTION_KEY", e.to_string()))?;

        let relay_state_secret =
            var("RELAY_STATE_SECRET").unwrap_or_else(|| INSECURE_RELAY_STATE_SECRET.to_string());

        let password_pepper =
            var("PASSWORD_PEPPER").unwrap_or_else(|| INSECURE_PASSWORD_PEPPER.to_string());
        if password_pepper.len() < 16 {
            return Err(ConfigError::invalid(
                "PASSWORD_PEPPER",
                "must be at least 16 bytes",
            ));
        }

        let http_timeout_secs: u64 = match var("HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::invalid("HTTP_TIMEOUT_SECS", format!("{e}")))?,
            None => storelink_sso::DEFAULT_HTTP_TIMEOUT.as_secs(),
        };
        if http_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "HTTP_TIMEOUT_SECS",
                "must be greater than zero",
            ));
        }

        let password_update_policy = match var("PASSWORD_UPDATE_POLICY") {
            Some(raw) => PasswordUpdatePolicy::parse(raw.trim()).ok_or_else(|| {
                ConfigError::invalid("PASSWORD_UPDATE_POLICY", "expected best_effort or strict")
            })?,
            None => PasswordUpdatePolicy::default(),
        };

        let id_token_verification = match var("ID_TOKEN_VERIFICATION") {
            Some(raw) => IdTokenVerification::parse(&raw).ok_or_else(|| {
                ConfigError::invalid(
                    "ID_TOKEN_VERIFICATION",
                    "expected jwks or trust_token_endpoint",
                )
            })?,
            None => IdTokenVerification::Jwks,
        };

        let storefront_login_path = var("STOREFRONT_LOGIN_PATH")
            .unwrap_or_else(|| DEFAULT_STOREFRONT_LOGIN_PATH.to_string());
        if !storefront_login_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "STOREFRONT_LOGIN_PATH",
                "must start with '/'",
            ));
        }

        let login_code_webhook = match (
            var("LOGIN_CODE_WEBHOOK_URL"),
            var("LOGIN_CODE_WEBHOOK_SECRET"),
        ) {
            (Some(url), Some(secret)) => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::invalid(
                        "LOGIN_CODE_WEBHOOK_URL",
                        "must be an absolute http(s) URL",
                    ));
                }
                if secret.len() < MIN_WEBHOOK_SECRET_LEN {
                    return Err(ConfigError::invalid(
                        "LOGIN_CODE_WEBHOOK_SECRET",
                        format!("must be at least {MIN_WEBHOOK_SECRET_LEN} bytes"),
                    ));
                }
                Some(LoginCodeWebhook { url, secret })
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingVar(
                    "LOGIN_CODE_WEBHOOK_SECRET".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingVar("LOGIN_CODE_WEBHOOK_URL".to_string()))
            }
            (None, None) => None,
        };

        Ok(Self {
            app_env,
            database_url,
            bind_addr,
            public_base_url,
            encryption_key,
            relay_state_secret,
            password_pepper,
            http_timeout: Duration::from_secs(http_timeout_secs),
            platform_api_version: var("PLATFORM_API_VERSION")
                .unwrap_or_else(|| DEFAULT_PLATFORM_API_VERSION.to_string()),
            password_update_policy,
            id_token_verification,
            state_backend,
            storefront_login_path,
            login_code_webhook,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info,storelink=debug".to_string()),
        })
    }

    /// Validate security configuration based on the application environment.
    ///
    /// Production returns `Err(issues)`; development returns `Ok(warnings)`.
    pub fn validate_security_config(&self) -> Result<Vec<String>, Vec<String>> {
        let mut issues = Vec::new();

        if self.encryption_key == INSECURE_ENCRYPTION_KEY {
            issues.push("ENCRYPTION_KEY is using the default insecure value (all zeros)".to_string());
        }
        if self.relay_state_secret == INSECURE_RELAY_STATE_SECRET {
            issues.push("RELAY_STATE_SECRET is using the default insecure value".to_string());
        }
        if self.password_pepper == INSECURE_PASSWORD_PEPPER {
            issues.push("PASSWORD_PEPPER is using the default insecure value".to_string());
        }
        if !self.public_base_url.starts_with("https://") {
            issues.push("PUBLIC_BASE_URL is not https".to_string());
        }
        if let Some(webhook) = &self.login_code_webhook {
            if !webhook.url.starts_with("https://") {
                issues.push("LOGIN_CODE_WEBHOOK_URL is not https".to_string());
            }
        }
        if self.id_token_verification == IdTokenVerification::TrustTokenEndpoint {
            issues.push("ID_TOKEN_VERIFICATION skips ID token signature checks".to_string());
        }

        if issues.is_empty() {
            return Ok(Vec::new());
        }

        if self.app_env.is_production() {
            Err(issues)
        } else {
            Ok(issues)
        }
    }
}
