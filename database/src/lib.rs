pub mod cache;
pub mod credits;
pub mod snapshots;

pub use cache::ResponseCache;
pub use credits::{CreditLedger, DeductOptions, DeductResult, GrantResult};
pub use snapshots::SnapshotStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use threadcraft_core::{CoreError, DatabaseError};
use tracing::{info, warn};

pub struct Database {
    connection_string: String,
    pool: Option<SqlitePool>,
}

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            pool: None,
        }
    }

    /// Connects and migrates in one step.
    pub async fn open(connection_string: &str) -> Result<Self, CoreError> {
        let mut db = Self::new(connection_string.to_string());
        db.connect().await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations").run(self.pool()?).await?;
        Ok(())
    }

    pub fn pool(&self) -> Result<&SqlitePool, CoreError> {
        self.pool.as_ref().ok_or_else(|| {
            DatabaseError::ConnectionFailed {
                reason: format!("{} is not connected", self.connection_string),
            }
            .into()
        })
    }

    pub fn credits(&self) -> Result<CreditLedger, CoreError> {
        Ok(CreditLedger::new(self.pool()?.clone()))
    }

    /// The write counter driving periodic sweeps lives in the returned
    /// value, so keep one cache per process.
    pub fn response_cache(&self) -> Result<ResponseCache, CoreError> {
        Ok(ResponseCache::new(self.pool()?.clone()))
    }

    pub fn snapshots(&self) -> Result<SnapshotStore, CoreError> {
        Ok(SnapshotStore::new(self.pool()?.clone()))
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

/// Opens a transaction that rolls back when dropped, so a caller cancelled
/// mid-write never hands a connection back to the pool with a transaction
/// still open.
pub(crate) async fn begin(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, CoreError> {
    pool.begin().await.map_err(lock_error)
}

/// Busy and locked failures mean another writer holds the database.
pub(crate) fn lock_error(e: sqlx::Error) -> CoreError {
    let locked = matches!(
        &e,
        sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy")
    );
    if locked {
        DatabaseError::DatabaseLocked.into()
    } else {
        DatabaseError::Sql(e).into()
    }
}

/// Commits on success, rolls back on failure.
pub(crate) async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: Result<T, CoreError>,
) -> Result<T, CoreError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::TransactionFailed {
                    reason: e.to_string(),
                })?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}
