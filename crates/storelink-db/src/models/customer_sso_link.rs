//! Customer SSO link model.
//!
//! Binds an external identity (provider + subject) to a storefront customer
//! email. Rows are upserted on every successful callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use storelink_core::{TenantAware, TenantId};
use uuid::Uuid;

/// Link status. Blocked links never receive a downstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Active,
    Blocked,
}

impl LinkStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
        }
    }

    /// Unknown values are treated as blocked.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            _ => Self::Blocked,
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CustomerSsoLink {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider_id: Uuid,
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
    pub login_count: i64,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for the login upsert.
#[derive(Debug, Clone)]
pub struct UpsertCustomerSsoLink {
    pub tenant_id: Uuid,
    pub provider_id: Uuid,
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl CustomerSsoLink {
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        LinkStatus::parse(&self.status)
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status() == LinkStatus::Blocked
    }

    /// Insert or refresh a link keyed by (tenant, provider, external id).
    ///
    /// Increments `login_count`, refreshes profile fields and never touches
    /// `status`.
    pub async fn upsert_on_login(
        pool: &sqlx::PgPool,
        input: UpsertCustomerSsoLink,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO customer_sso_links (
                tenant_id, provider_id, external_id, email, first_name, last_name,
                login_count, last_login_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1, NOW())
            ON CONFLICT (tenant_id, provider_id, external_id)
            DO UPDATE SET
                email = EXCLUDED.email,
                first_name = COALESCE(EXCLUDED.first_name, customer_sso_links.first_name),
                last_name = COALESCE(EXCLUDED.last_name, customer_sso_links.last_name),
                login_count = customer_sso_links.login_count + 1,
                last_login_at = NOW(),
                updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(input.provider_id)
        .bind(&input.external_id)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM customer_sso_links WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Whether any link for this email in the tenant is blocked.
    pub async fn is_email_blocked(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM customer_sso_links
                WHERE tenant_id = $1 AND lower(email) = lower($2) AND status = 'blocked'
            )
            ",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_one(pool)
        .await
    }

    /// Set the link status (block / unblock).
    pub async fn set_status(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
        status: LinkStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE customer_sso_links
            SET status = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(pool)
        .await
    }
}

impl TenantAware for CustomerSsoLink {
    fn tenant_id(&self) -> TenantId {
        TenantId::from_uuid(self.tenant_id)
    }
}
