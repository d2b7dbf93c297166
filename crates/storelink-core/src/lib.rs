//! storelink Core Library
//!
//! Shared types and traits for storelink.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (TenantId, ProviderId, LinkId, EventId)
//! - [`traits`] - Multi-tenant traits (TenantAware)
//!
//! # Example
//!
//! ```
//! use storelink_core::{ProviderId, TenantId};
//!
//! let tenant_id = TenantId::new();
//! let provider_id = ProviderId::new();
//! assert_ne!(tenant_id.as_uuid(), provider_id.as_uuid());
//! ```

pub mod ids;
pub mod traits;

pub use ids::{EventId, LinkId, ParseIdError, ProviderId, TenantId};
pub use traits::TenantAware;
