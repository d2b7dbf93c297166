//! Login audit events.
//!
//! Append-only: rows are inserted by the orchestrator and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of audited login event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginEventKind {
    Initiated,
    Success,
    Failed,
    Logout,
    TokenRefresh,
}

impl LoginEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Logout => "logout",
            Self::TokenRefresh => "token_refresh",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "initiated" => Self::Initiated,
            "success" => Self::Success,
            "logout" => Self::Logout,
            "token_refresh" => Self::TokenRefresh,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for LoginEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LoginEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub link_id: Option<Uuid>,
    pub kind: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_code: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Input for appending an event.
#[derive(Debug, Clone)]
pub struct NewLoginEvent {
    pub tenant_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub link_id: Option<Uuid>,
    pub kind: LoginEventKind,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_code: Option<String>,
    pub metadata: serde_json::Value,
}

impl LoginEvent {
    #[must_use]
    pub fn kind(&self) -> LoginEventKind {
        LoginEventKind::parse(&self.kind)
    }

    /// Build the in-memory row for an event that has not been persisted.
    #[must_use]
    pub fn from_new(input: NewLoginEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            provider_id: input.provider_id,
            link_id: input.link_id,
            kind: input.kind.as_str().to_string(),
            ip_address: input.ip_address,
            user_agent: input.user_agent,
            error_code: input.error_code,
            metadata: input.metadata,
            created_at: Utc::now(),
        }
    }

    pub async fn append(pool: &sqlx::PgPool, input: NewLoginEvent) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO login_events (
                tenant_id, provider_id, link_id, kind, ip_address, user_agent,
                error_code, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(input.provider_id)
        .bind(input.link_id)
        .bind(input.kind.as_str())
        .bind(&input.ip_address)
        .bind(&input.user_agent)
        .bind(&input.error_code)
        .bind(&input.metadata)
        .fetch_one(pool)
        .await
    }

    /// Most recent events for a tenant.
    pub async fn list_by_tenant(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM login_events
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
