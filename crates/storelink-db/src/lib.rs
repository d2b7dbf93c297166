//! storelink database layer.
//!
//! Record models are plain `sqlx::FromRow` structs with associated async
//! functions that take a `&PgPool`. Enumerations are stored as TEXT and
//! converted with `as_str` / `parse`.

pub mod error;
pub mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::run_migrations;
pub use models::{
    CreateSsoProvider, CustomerSsoLink, EphemeralState, LinkStatus, LoginEvent, LoginEventKind,
    NewLoginEvent, ProviderStatus, SsoProvider, Tenant, TenantStatus, UpsertCustomerSsoLink,
};
