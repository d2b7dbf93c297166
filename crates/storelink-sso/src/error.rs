//! Error types for the SSO core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use storelink_core::TenantId;
use thiserror::Error;

use crate::crypto::CodecError;
use crate::services::directory::DirectoryError;
use crate::state::StateError;

/// Result type for SSO operations.
pub type SsoResult<T> = Result<T, SsoError>;

/// SSO error taxonomy.
///
/// Every variant maps to a stable code recorded on `failed` login events.
#[derive(Debug, Error)]
pub enum SsoError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("Tenant is not active: {0}")]
    TenantInactive(TenantId),

    #[error("Tenant has no storefront credentials: {0}")]
    MissingStoreCredentials(TenantId),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider disabled: {0}")]
    ProviderDisabled(String),

    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),

    /// Redirect state missing, expired, replayed, or bound to another tenant.
    #[error("Invalid or expired state")]
    InvalidState,

    #[error("Identity provider authentication failed: {error}")]
    ProviderAuthError {
        error: String,
        description: Option<String>,
    },

    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Customer is blocked")]
    UserBlocked,

    /// Login code wrong, expired or already used.
    #[error("Invalid or expired login code")]
    InvalidCode,

    #[error("Too many failed login code attempts")]
    TooManyAttempts,

    #[error("Customer directory error ({status:?}): {message}")]
    DirectoryError {
        status: Option<u16>,
        message: String,
    },

    #[error("Stored configuration could not be decrypted: {0}")]
    ConfigDecryptionError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("State store error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl SsoError {
    /// Shorthand for an IdP-side failure with no description.
    pub fn provider_auth(error: impl Into<String>) -> Self {
        Self::ProviderAuthError {
            error: error.into(),
            description: None,
        }
    }

    /// Stable machine-readable code, recorded as `error_code` on audit events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::TenantInactive(_) => "TENANT_INACTIVE",
            Self::MissingStoreCredentials(_) => "MISSING_STORE_CREDENTIALS",
            Self::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            Self::ProviderDisabled(_) => "PROVIDER_DISABLED",
            Self::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            Self::InvalidState => "INVALID_STATE",
            Self::ProviderAuthError { .. } => "PROVIDER_AUTH_ERROR",
            Self::ProviderUnreachable(_) => "PROVIDER_UNREACHABLE",
            Self::UserBlocked => "USER_BLOCKED",
            Self::InvalidCode => "INVALID_CODE",
            Self::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            Self::DirectoryError { .. } => "DIRECTORY_ERROR",
            Self::ConfigDecryptionError(_) => "CONFIG_DECRYPTION_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Database(_) | Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TenantNotFound(_) | Self::ProviderNotConfigured(_) => StatusCode::NOT_FOUND,
            Self::UnknownProvider(_)
            | Self::InvalidState
            | Self::InvalidCode
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderAuthError { .. } => StatusCode::UNAUTHORIZED,
            Self::TenantInactive(_) | Self::ProviderDisabled(_) | Self::UserBlocked => {
                StatusCode::FORBIDDEN
            }
            Self::ProviderUnreachable(_) | Self::DirectoryError { .. } => StatusCode::BAD_GATEWAY,
            Self::MissingStoreCredentials(_)
            | Self::ConfigDecryptionError(_)
            | Self::Database(_)
            | Self::Storage(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to an end customer.
    ///
    /// IdP- and directory-supplied detail stays in the logs.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "Store not found",
            Self::TenantInactive(_) | Self::MissingStoreCredentials(_) => {
                "Sign-in is not available for this store"
            }
            Self::ProviderNotConfigured(_) | Self::ProviderDisabled(_) => {
                "This sign-in method is not available"
            }
            Self::UnknownProvider(_) => "Unknown sign-in method",
            Self::InvalidState => "Your sign-in session expired, please try again",
            Self::ProviderAuthError { .. } => "Authentication failed at identity provider",
            Self::ProviderUnreachable(_) => "Identity provider is unavailable, please try again",
            Self::UserBlocked => "Your account is not allowed to sign in",
            Self::InvalidCode => "The code is invalid or has expired",
            Self::TooManyAttempts => "Too many attempts, please request a new code later",
            Self::DirectoryError { .. } => "Could not complete sign-in to the store",
            Self::InvalidRequest(_) => "Invalid request",
            Self::ConfigDecryptionError(_)
            | Self::Database(_)
            | Self::Storage(_)
            | Self::Internal(_) => "An internal error occurred",
        }
    }
}

impl From<StateError> for SsoError {
    fn from(err: StateError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<DirectoryError> for SsoError {
    fn from(err: DirectoryError) -> Self {
        Self::DirectoryError {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for SsoError {
    fn from(err: CodecError) -> Self {
        Self::ConfigDecryptionError(err.to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::ProviderAuthError { error, description } => {
                tracing::warn!(
                    idp_error = %error,
                    idp_description = ?description,
                    "IdP authentication failed (details not reflected to client)"
                );
            }
            Self::DirectoryError { status, message } => {
                tracing::error!(upstream_status = ?status, message = %message, "Customer directory call failed");
            }
            err if status.is_server_error() => {
                tracing::error!(error = %err, code = err.code(), "SSO request failed");
            }
            err => {
                tracing::debug!(error = %err, code = err.code(), "SSO request rejected");
            }
        }

        let body = ErrorResponse {
            error: self.code().to_lowercase(),
            message: self.public_message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SsoError::UserBlocked.code(), "USER_BLOCKED");
        assert_eq!(SsoError::InvalidState.code(), "INVALID_STATE");
        assert_eq!(
            SsoError::UnknownProvider("x".into()).code(),
            "UNKNOWN_PROVIDER"
        );
    }

    #[test]
    fn test_invalid_state_message_is_generic() {
        let err = SsoError::InvalidState;
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.public_message(),
            "Your sign-in session expired, please try again"
        );
    }

    #[test]
    fn test_directory_error_keeps_upstream_status() {
        let err: SsoError = DirectoryError::Api {
            status: 422,
            message: "email taken".into(),
        }
        .into();
        match err {
            SsoError::DirectoryError { status, .. } => assert_eq!(status, Some(422)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_provider_auth_detail_not_in_public_message() {
        let err = SsoError::ProviderAuthError {
            error: "access_denied".into(),
            description: Some("<script>".into()),
        };
        assert!(!err.public_message().contains("script"));
    }
}
