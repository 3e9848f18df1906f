use crate::rate_limiter::AdmissionDecision;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use threadcraft_core::CoreError;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared ordered store of admission tokens, one sliding window per key.
///
/// `admit` must prune, count and record as a single atomic step so that
/// concurrent callers sharing a key never over-admit.
#[async_trait]
pub trait WindowStore: Send + Sync + Debug {
    async fn admit(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<AdmissionDecision, CoreError>;

    /// Live token count and oldest live timestamp, without recording.
    async fn live_tokens(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<(u32, Option<i64>), CoreError>;
}

pub(crate) fn decide(
    live: u32,
    oldest_ms: Option<i64>,
    max_requests: u32,
    window_ms: i64,
    now_ms: i64,
) -> AdmissionDecision {
    let reset_ms = oldest_ms
        .map(|oldest| (oldest + window_ms - now_ms).max(0) as u64)
        .unwrap_or(0);

    if live < max_requests {
        AdmissionDecision {
            allowed: true,
            remaining: max_requests - live - 1,
            // The token about to be recorded is the oldest when the window was empty.
            reset_ms: if live == 0 { window_ms.max(0) as u64 } else { reset_ms },
        }
    } else {
        AdmissionDecision {
            allowed: false,
            remaining: 0,
            reset_ms,
        }
    }
}

#[derive(Debug, Default)]
struct WindowEntry {
    tokens: BTreeSet<(i64, Uuid)>,
    expires_at_ms: i64,
}

impl WindowEntry {
    /// Drops tokens at or before `now - window`.
    fn prune(&mut self, window_ms: i64, now_ms: i64) {
        let cutoff = now_ms - window_ms;
        self.tokens = self.tokens.split_off(&(cutoff + 1, Uuid::nil()));
    }

    fn oldest(&self) -> Option<i64> {
        self.tokens.iter().next().map(|(ts, _)| *ts)
    }
}

/// Process-local window store.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn key_count(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn admit(
        &self,
        key: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<AdmissionDecision, CoreError> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, entry| entry.expires_at_ms > now_ms);

        let entry = windows.entry(key.to_string()).or_default();
        entry.prune(window_ms, now_ms);

        let live = entry.tokens.len() as u32;
        let decision = decide(live, entry.oldest(), max_requests, window_ms, now_ms);
        if decision.allowed {
            entry.tokens.insert((now_ms, Uuid::new_v4()));
            entry.expires_at_ms = now_ms + window_ms;
        } else if entry.tokens.is_empty() {
            windows.remove(key);
        }

        Ok(decision)
    }

    async fn live_tokens(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<(u32, Option<i64>), CoreError> {
        let windows = self.windows.lock().await;
        Ok(windows
            .get(key)
            .map(|entry| {
                let cutoff = now_ms - window_ms;
                let live: Vec<i64> = entry
                    .tokens
                    .iter()
                    .map(|(ts, _)| *ts)
                    .filter(|ts| *ts > cutoff)
                    .collect();
                (live.len() as u32, live.first().copied())
            })
            .unwrap_or((0, None)))
    }
}

#[cfg(feature = "database")]
pub use sqlite::SqliteWindowStore;

#[cfg(feature = "database")]
mod sqlite {
    use super::{decide, WindowStore};
    use crate::rate_limiter::AdmissionDecision;
    use async_trait::async_trait;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
    use sqlx::Row;
    use std::str::FromStr;
    use threadcraft_core::CoreError;
    use tracing::{debug, warn};
    use uuid::Uuid;

    /// Window store in a SQLite file shared by every worker process.
    ///
    /// Each admission runs in one transaction whose first statement is a
    /// write, so check-and-record is serialized across processes. The
    /// transaction rolls back if the admitting future is dropped.
    #[derive(Debug, Clone)]
    pub struct SqliteWindowStore {
        pool: SqlitePool,
    }

    impl SqliteWindowStore {
        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }

        pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
            let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?;
            let store = Self::new(pool);
            store.ensure_schema().await?;
            Ok(store)
        }

        pub async fn ensure_schema(&self) -> Result<(), CoreError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS rate_limit_tokens (
                    window_key TEXT NOT NULL,
                    ts_ms INTEGER NOT NULL,
                    member TEXT NOT NULL,
                    expires_at_ms INTEGER NOT NULL,
                    PRIMARY KEY (window_key, ts_ms, member)
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_rate_limit_tokens_expiry ON rate_limit_tokens (expires_at_ms)",
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    async fn admit_locked(
        conn: &mut SqliteConnection,
        key: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<AdmissionDecision, sqlx::Error> {
        sqlx::query("DELETE FROM rate_limit_tokens WHERE expires_at_ms <= ?1 OR (window_key = ?2 AND ts_ms <= ?3)")
            .bind(now_ms)
            .bind(key)
            .bind(now_ms - window_ms)
            .execute(&mut *conn)
            .await?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS live, MIN(ts_ms) AS oldest FROM rate_limit_tokens WHERE window_key = ?1",
        )
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;
        let live: i64 = row.try_get("live")?;
        let oldest: Option<i64> = row.try_get("oldest")?;

        let decision = decide(live as u32, oldest, max_requests, window_ms, now_ms);
        if decision.allowed {
            let expires_at_ms = now_ms + window_ms;
            sqlx::query(
                "INSERT INTO rate_limit_tokens (window_key, ts_ms, member, expires_at_ms) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(key)
            .bind(now_ms)
            .bind(Uuid::new_v4().to_string())
            .bind(expires_at_ms)
            .execute(&mut *conn)
            .await?;
            sqlx::query("UPDATE rate_limit_tokens SET expires_at_ms = ?1 WHERE window_key = ?2")
                .bind(expires_at_ms)
                .bind(key)
                .execute(&mut *conn)
                .await?;
        }
        Ok(decision)
    }

    #[async_trait]
    impl WindowStore for SqliteWindowStore {
        async fn admit(
            &self,
            key: &str,
            max_requests: u32,
            window_ms: i64,
            now_ms: i64,
        ) -> Result<AdmissionDecision, CoreError> {
            let mut tx = self.pool.begin().await?;

            match admit_locked(&mut tx, key, max_requests, window_ms, now_ms).await {
                Ok(decision) => {
                    tx.commit().await?;
                    debug!(
                        "Window {} admission: allowed={} remaining={}",
                        key, decision.allowed, decision.remaining
                    );
                    Ok(decision)
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("Rollback of window {} failed: {}", key, rollback);
                    }
                    Err(e.into())
                }
            }
        }

        async fn live_tokens(
            &self,
            key: &str,
            window_ms: i64,
            now_ms: i64,
        ) -> Result<(u32, Option<i64>), CoreError> {
            let row = sqlx::query(
                "SELECT COUNT(*) AS live, MIN(ts_ms) AS oldest FROM rate_limit_tokens WHERE window_key = ?1 AND ts_ms > ?2",
            )
            .bind(key)
            .bind(now_ms - window_ms)
            .fetch_one(&self.pool)
            .await?;
            let live: i64 = row.try_get("live")?;
            let oldest: Option<i64> = row.try_get("oldest")?;
            Ok((live as u32, oldest))
        }
    }
}
