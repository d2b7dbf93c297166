//! Tenant (storefront) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use storelink_core::{TenantAware, TenantId};
use uuid::Uuid;

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Parse from database string representation.
    ///
    /// Unknown values are treated as inactive.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Inactive,
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A storefront that owns SSO providers and customer links.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    /// Storefront domain, e.g. `acme.myshopify.com`.
    pub shop_domain: String,
    pub status: String,
    pub is_plus_tier: bool,
    /// Codec-encrypted platform credentials (admin API access token).
    pub credentials_encrypted: Option<String>,
    /// Codec-encrypted multipass shared secret.
    pub multipass_secret_encrypted: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Typed status.
    #[must_use]
    pub fn status(&self) -> TenantStatus {
        TenantStatus::parse(&self.status)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TenantStatus::Active
    }

    /// Find a tenant by id.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a tenant by its storefront domain.
    pub async fn find_by_domain(
        pool: &sqlx::PgPool,
        shop_domain: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM tenants WHERE shop_domain = $1")
            .bind(shop_domain)
            .fetch_optional(pool)
            .await
    }
}

impl TenantAware for Tenant {
    fn tenant_id(&self) -> TenantId {
        TenantId::from_uuid(self.id)
    }
}
