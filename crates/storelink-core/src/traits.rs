//! Multi-tenant traits.

use crate::ids::TenantId;

/// Trait for entities that belong to a specific tenant.
///
/// ```
/// use storelink_core::{TenantId, TenantAware};
///
/// struct Link {
///     tenant_id: TenantId,
/// }
///
/// impl TenantAware for Link {
///     fn tenant_id(&self) -> TenantId {
///         self.tenant_id
///     }
/// }
///
/// let tenant = TenantId::new();
/// assert!(Link { tenant_id: tenant }.belongs_to(tenant));
/// ```
pub trait TenantAware {
    /// Returns the tenant that owns this entity.
    fn tenant_id(&self) -> TenantId;

    /// Returns true when the entity is owned by `tenant`.
    fn belongs_to(&self, tenant: TenantId) -> bool {
        self.tenant_id() == tenant
    }
}
