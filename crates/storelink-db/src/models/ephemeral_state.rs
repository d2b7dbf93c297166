//! Short-lived single-use key/value rows.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct EphemeralState {
    pub key: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EphemeralState {
    /// Insert or overwrite a value.
    pub async fn put(
        pool: &sqlx::PgPool,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO ephemeral_state (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Read a live value without consuming it.
    pub async fn peek(pool: &sqlx::PgPool, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT value FROM ephemeral_state WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Atomically delete and return a live value.
    ///
    /// Concurrent callers race on the same row; Postgres guarantees only one
    /// of them sees it in `RETURNING`.
    pub async fn take(pool: &sqlx::PgPool, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r"
            DELETE FROM ephemeral_state
            WHERE key = $1 AND expires_at > NOW()
            RETURNING value
            ",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Remove expired rows. Returns the number deleted.
    pub async fn purge_expired(pool: &sqlx::PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM ephemeral_state WHERE expires_at <= NOW()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
