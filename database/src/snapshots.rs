use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use threadcraft_core::{CoreError, TrackedComment, TrackingSnapshot};
use tracing::debug;

/// Append-only history of scheduled checks per posted comment.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns false when a snapshot for this check index already exists;
    /// the stored one is kept.
    pub async fn record(
        &self,
        comment: &TrackedComment,
        snapshot: &TrackingSnapshot,
    ) -> Result<bool, CoreError> {
        let inserted = sqlx::query(
            "INSERT INTO tracking_snapshots \
             (provider_name, comment_id, check_index, checked_at, score, reply_count, comment_exists, removed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(provider_name, comment_id, check_index) DO NOTHING",
        )
        .bind(&comment.provider_name)
        .bind(&comment.comment_id)
        .bind(snapshot.check_index as i64)
        .bind(snapshot.checked_at)
        .bind(snapshot.score)
        .bind(i64::from(snapshot.reply_count))
        .bind(snapshot.exists)
        .bind(snapshot.removed)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        debug!(
            "Snapshot {} for {}/{} recorded: {}",
            snapshot.check_index, comment.provider_name, comment.comment_id, inserted
        );
        Ok(inserted)
    }

    /// Snapshots for one comment in check order.
    pub async fn history(&self, comment: &TrackedComment) -> Result<Vec<TrackingSnapshot>, CoreError> {
        let rows = sqlx::query(
            "SELECT check_index, checked_at, score, reply_count, comment_exists, removed \
             FROM tracking_snapshots WHERE provider_name = ?1 AND comment_id = ?2 \
             ORDER BY check_index ASC",
        )
        .bind(&comment.provider_name)
        .bind(&comment.comment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TrackingSnapshot, CoreError> {
                let check_index: i64 = row.try_get("check_index")?;
                let reply_count: i64 = row.try_get("reply_count")?;
                let checked_at: DateTime<Utc> = row.try_get("checked_at")?;
                Ok(TrackingSnapshot {
                    check_index: check_index as usize,
                    checked_at,
                    score: row.try_get("score")?,
                    reply_count: reply_count as u32,
                    exists: row.try_get("comment_exists")?,
                    removed: row.try_get("removed")?,
                })
            })
            .collect()
    }
}
