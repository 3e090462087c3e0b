//! Query result cache.
//!
//! Keys are raw query strings, matched exactly. Values are the JSON form of
//! [`QueryResult`] with a time-to-live; writing a key again replaces the
//! value and restarts its TTL.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::models::QueryResult;

/// Key-value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> RagResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RagResult<()>;
}

/// Cache held in the service database (`cache_entries`).
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> RagResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RagError::Cache(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RagResult<()> {
        let expires_at = now_ms().saturating_add(ttl.as_millis() as i64);
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RagError::Cache(e.to_string()))?;

        // Expired rows are dropped opportunistically on write
        sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::Cache(e.to_string()))?;
        Ok(())
    }
}

/// Process-local cache. Entries do not survive a restart.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> RagResult<Option<String>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| RagError::Cache("cache lock poisoned".into()))?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> RagResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| RagError::Cache("cache lock poisoned".into()))?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// Typed view over a [`CacheStore`] holding [`QueryResult`] payloads.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub async fn get(&self, key: &str) -> RagResult<Option<QueryResult>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &str, value: &QueryResult) -> RagResult<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &QueryResult, ttl: Duration) -> RagResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| RagError::Cache(e.to_string()))?;
        self.store.set(key, &raw, ttl).await
    }
}

/// Build the cache selected by `[cache].backend`.
pub fn create_cache(config: &Config, pool: &SqlitePool) -> anyhow::Result<ResultCache> {
    let store: Arc<dyn CacheStore> = match config.cache.backend.as_str() {
        "sqlite" => Arc::new(SqliteCache::new(pool.clone())),
        "memory" => Arc::new(MemoryCache::new()),
        other => anyhow::bail!("Unknown cache backend: {}", other),
    };
    Ok(ResultCache::new(
        store,
        Duration::from_secs(config.cache.ttl_secs),
    ))
}
