//! Tenant-scoped SSO provider record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use storelink_core::{TenantAware, TenantId};
use uuid::Uuid;

/// Lifecycle status of a provider record.
///
/// Records start in `PendingSetup` and move to `Active` after a successful
/// test login or an explicit activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    PendingSetup,
    Active,
    Disabled,
}

impl ProviderStatus {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSetup => "pending_setup",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parse from database string representation.
    ///
    /// Unknown values are treated as disabled.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "pending_setup" => Self::PendingSetup,
            "active" => Self::Active,
            _ => Self::Disabled,
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SSO provider configuration entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SsoProvider {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Provider type token (`google`, `okta`, ...).
    pub provider_type: String,
    /// `oidc` or `saml`.
    pub protocol: String,
    pub enabled: bool,
    pub status: String,
    pub display_name: Option<String>,
    /// Codec-encrypted `ProviderConfig`.
    pub config_encrypted: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a provider record.
#[derive(Debug, Clone)]
pub struct CreateSsoProvider {
    pub tenant_id: Uuid,
    pub provider_type: String,
    pub protocol: String,
    pub display_name: Option<String>,
    pub config_encrypted: String,
}

impl SsoProvider {
    #[must_use]
    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::parse(&self.status)
    }

    /// Only enabled records in the `active` state may start a login.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.enabled && self.status() == ProviderStatus::Active
    }

    /// Create a provider record in the `pending_setup` state.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: CreateSsoProvider,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO sso_providers (
                tenant_id, provider_type, protocol, display_name, config_encrypted
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(&input.provider_type)
        .bind(&input.protocol)
        .bind(&input.display_name)
        .bind(&input.config_encrypted)
        .fetch_one(pool)
        .await
    }

    /// Find a provider record by id, scoped to a tenant.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sso_providers WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a provider record by tenant and provider type.
    pub async fn find_by_type(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        provider_type: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM sso_providers WHERE tenant_id = $1 AND provider_type = $2",
        )
        .bind(tenant_id)
        .bind(provider_type)
        .fetch_optional(pool)
        .await
    }

    /// Move a record to `active` and enable it.
    pub async fn activate(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE sso_providers
            SET status = 'active', enabled = TRUE, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Move a record to `disabled`.
    pub async fn disable(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE sso_providers
            SET status = 'disabled', enabled = FALSE, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

impl TenantAware for SsoProvider {
    fn tenant_id(&self) -> TenantId {
        TenantId::from_uuid(self.tenant_id)
    }
}
