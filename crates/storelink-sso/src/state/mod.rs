//! Ephemeral state: redirect state, credential hand-off and one-time codes.

pub mod service;
pub mod store;
pub mod types;

pub use service::{StateService, HANDOFF_TTL, MAX_OTP_ATTEMPTS, OTP_TTL, REDIRECT_STATE_TTL};
pub use store::{EphemeralStore, InMemoryEphemeralStore, PostgresEphemeralStore, StateError};
pub use types::{CredentialHandoff, OneTimeCode, OtpCheck, RedirectState};
