//! Ephemeral key/value storage with TTL and single-use consumption.
//!
//! `consume` must be atomic: of two concurrent calls on the same key, exactly
//! one observes the value.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storelink_db::EphemeralState;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State backend error: {0}")]
    Backend(String),

    #[error("Invalid TTL: {0:?}")]
    InvalidTtl(Duration),

    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store a value, replacing any previous value for the key.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError>;

    /// Read a live value without consuming it.
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Remove and return a live value. Returns `None` when missing, expired
    /// or already consumed.
    async fn consume(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Drop expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, StateError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local store.
///
/// Only valid for single-instance deployments: state written by one process
/// is invisible to the others behind a load balancer.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEphemeralStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryEphemeralStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or expired.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(StateError::InvalidTtl(ttl))?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn consume(&self, key: &str) -> Result<Option<String>, StateError> {
        // remove under the write lock so concurrent consumers serialize
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value))
    }

    async fn purge_expired(&self) -> Result<u64, StateError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        let removed = (before - entries.len()) as u64;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired ephemeral state");
        }
        Ok(removed)
    }
}

/// Postgres-backed store shared by every instance.
#[derive(Debug, Clone)]
pub struct PostgresEphemeralStore {
    pool: PgPool,
}

impl PostgresEphemeralStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EphemeralStore for PostgresEphemeralStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError> {
        let ttl_chrono = chrono::Duration::from_std(ttl).map_err(|_| StateError::InvalidTtl(ttl))?;
        let expires_at = Utc::now() + ttl_chrono;
        EphemeralState::put(&self.pool, key, &value, expires_at)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        EphemeralState::peek(&self.pool, key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn consume(&self, key: &str) -> Result<Option<String>, StateError> {
        EphemeralState::take(&self.pool, key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn purge_expired(&self) -> Result<u64, StateError> {
        EphemeralState::purge_expired(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_does_not_consume() {
        let store = InMemoryEphemeralStore::new();
        store.set("k", "v".into(), TTL).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.consume("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = InMemoryEphemeralStore::new();
        store.set("k", "v".into(), TTL).await.unwrap();
        assert!(store.consume("k").await.unwrap().is_some());
        for _ in 0..3 {
            assert!(store.consume("k").await.unwrap().is_none());
        }
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_consume_exactly_one_wins() {
        let store = InMemoryEphemeralStore::new();
        for round in 0..50 {
            let key = format!("state-{round}");
            store.set(&key, "v".into(), TTL).await.unwrap();

            let mut handles = Vec::new();
            for _ in 0..8 {
                let store = store.clone();
                let key = key.clone();
                handles.push(tokio::spawn(async move { store.consume(&key).await }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap().is_some() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let store = InMemoryEphemeralStore::new();
        store
            .set("k", "v".into(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.consume("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryEphemeralStore::new();
        store
            .set("old", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        store.set("new", "v".into(), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryEphemeralStore::new();
        store.set("k", "a".into(), TTL).await.unwrap();
        store.set("k", "b".into(), TTL).await.unwrap();
        assert_eq!(store.consume("k").await.unwrap().as_deref(), Some("b"));
    }
}
