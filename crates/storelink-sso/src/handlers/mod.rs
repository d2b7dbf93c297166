//! HTTP handlers.

pub mod callback;
pub mod code;
pub mod credentials;
pub mod health;
pub mod login;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::{SsoError, SsoResult};

pub use callback::{oidc_callback_get, oidc_callback_post, saml_callback};
pub use code::{request_code, verify_code};
pub use credentials::credentials;
pub use health::health;
pub use login::login;

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> SsoResult<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| SsoError::Internal(format!("invalid redirect location: {e}")))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}
