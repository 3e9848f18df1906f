use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use threadcraft_core::CoreError;
use tracing::{debug, info};

/// Every this many writes, all expired rows are swept in one statement.
const SWEEP_EVERY: u64 = 100;

/// TTL cache of upstream responses keyed by request URL.
///
/// An entry is valid while `now <= cached_at + ttl_seconds`. Expired entries
/// are dropped when read and by the periodic sweep on write.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    pool: SqlitePool,
    writes: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, url: &str) -> Result<Option<String>, CoreError> {
        self.get_at(url, now_secs()).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, CoreError> {
        match self.get(url).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, url: &str, value: &str, ttl_seconds: u64) -> Result<(), CoreError> {
        self.set_at(url, value, ttl_seconds, now_secs()).await
    }

    pub async fn set_json<T: Serialize>(
        &self,
        url: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), CoreError> {
        let body = serde_json::to_string(value)?;
        self.set(url, &body, ttl_seconds).await
    }

    /// Deletes every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, CoreError> {
        self.purge_expired_at(now_secs()).await
    }

    pub(crate) async fn get_at(&self, url: &str, now: i64) -> Result<Option<String>, CoreError> {
        let row = sqlx::query("SELECT body, cached_at, ttl_seconds FROM response_cache WHERE url = ?1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let cached_at: i64 = row.try_get("cached_at")?;
        let ttl_seconds: i64 = row.try_get("ttl_seconds")?;
        if now <= cached_at + ttl_seconds {
            return Ok(Some(row.try_get("body")?));
        }

        sqlx::query("DELETE FROM response_cache WHERE url = ?1 AND cached_at + ttl_seconds < ?2")
            .bind(url)
            .bind(now)
            .execute(&self.pool)
            .await?;
        debug!("Cache entry for {} expired", url);
        Ok(None)
    }

    pub(crate) async fn set_at(
        &self,
        url: &str,
        value: &str,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<(), CoreError> {
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| CoreError::invalid_input(format!("ttl {} is too large", ttl_seconds)))?;

        sqlx::query(
            "INSERT INTO response_cache (url, body, cached_at, ttl_seconds) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(url) DO UPDATE SET body = excluded.body, cached_at = excluded.cached_at, \
             ttl_seconds = excluded.ttl_seconds",
        )
        .bind(url)
        .bind(value)
        .bind(now)
        .bind(ttl)
        .execute(&self.pool)
        .await?;

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            let removed = self.purge_expired_at(now).await?;
            if removed > 0 {
                info!("Swept {} expired cache entries", removed);
            }
        }
        Ok(())
    }

    pub(crate) async fn purge_expired_at(&self, now: i64) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE cached_at + ttl_seconds < ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}
