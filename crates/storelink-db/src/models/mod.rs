//! Record models.

pub mod customer_sso_link;
pub mod ephemeral_state;
pub mod login_event;
pub mod sso_provider;
pub mod tenant;

pub use customer_sso_link::{CustomerSsoLink, LinkStatus, UpsertCustomerSsoLink};
pub use ephemeral_state::EphemeralState;
pub use login_event::{LoginEvent, LoginEventKind, NewLoginEvent};
pub use sso_provider::{CreateSsoProvider, ProviderStatus, SsoProvider};
pub use tenant::{Tenant, TenantStatus};
