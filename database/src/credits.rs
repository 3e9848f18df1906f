//! Two-tier credit balances with an append-only audit trail.
//!
//! Expiring `credits` are always spent before `permanent_credits`. Every
//! balance change and its ledger row commit in the same transaction.

use crate::{begin, finish, lock_error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use threadcraft_core::{
    CoreError, CreditAccount, CreditError, CreditLedgerEntry, CreditReason,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductOptions {
    /// When false, a short balance is reported in the result instead of
    /// returned as an error.
    pub throw_on_insufficient: bool,
    pub detail: Option<String>,
}

impl Default for DeductOptions {
    fn default() -> Self {
        Self {
            throw_on_insufficient: true,
            detail: None,
        }
    }
}

impl DeductOptions {
    pub fn non_throwing() -> Self {
        Self {
            throw_on_insufficient: false,
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductResult {
    pub success: bool,
    pub credits_deducted: i64,
    pub permanent_credits_deducted: i64,
    pub balance: CreditAccount,
    pub ledger_entry_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantResult {
    pub balance: CreditAccount,
    pub ledger_entry_id: i64,
}

#[derive(Debug, Clone)]
pub struct CreditLedger {
    pool: SqlitePool,
}

impl CreditLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the account if missing. Existing balances are left untouched.
    pub async fn open_account(
        &self,
        user_id: &str,
        credits: i64,
        permanent_credits: i64,
    ) -> Result<CreditAccount, CoreError> {
        if credits < 0 || permanent_credits < 0 {
            return Err(CoreError::invalid_input(format!(
                "opening balances must be non-negative, got {} / {}",
                credits, permanent_credits
            )));
        }

        let opening = credits.checked_add(permanent_credits).ok_or_else(|| {
            CoreError::invalid_input(format!(
                "opening balance {} + {} is out of range",
                credits, permanent_credits
            ))
        })?;

        let mut tx = begin(&self.pool).await?;
        let result = open_locked(&mut tx, user_id, credits, permanent_credits, opening).await;
        finish(tx, result).await
    }

    pub async fn balance(&self, user_id: &str) -> Result<CreditAccount, CoreError> {
        let mut conn = self.pool.acquire().await?;
        read_account(&mut conn, user_id).await
    }

    /// Ledger entries for a user, oldest first.
    pub async fn entries(&self, user_id: &str) -> Result<Vec<CreditLedgerEntry>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, delta, previous_total, new_total, reason, detail, created_at \
             FROM credit_ledger WHERE user_id = ?1 ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn deduct(
        &self,
        user_id: &str,
        amount: i64,
        reason: CreditReason,
        options: DeductOptions,
    ) -> Result<DeductResult, CoreError> {
        require_positive(amount)?;

        let mut tx = begin(&self.pool).await?;
        let result = deduct_locked(&mut tx, user_id, amount, reason, &options).await;
        let result = finish(tx, result).await;

        match &result {
            Ok(r) if r.success => info!(
                "Deducted {} from {} ({} expiring, {} permanent) for {}",
                amount, user_id, r.credits_deducted, r.permanent_credits_deducted, reason
            ),
            Ok(r) => warn!(
                "Deduction of {} from {} refused: {}",
                amount,
                user_id,
                r.error.as_deref().unwrap_or("insufficient credits")
            ),
            Err(e) => warn!("Deduction of {} from {} failed: {}", amount, user_id, e),
        }
        result
    }

    pub async fn grant_permanent(
        &self,
        user_id: &str,
        amount: i64,
        reason: CreditReason,
        detail: Option<&str>,
    ) -> Result<GrantResult, CoreError> {
        require_positive(amount)?;

        let mut tx = begin(&self.pool).await?;
        let grant = CreditAccount {
            credits: 0,
            permanent_credits: amount,
        };
        let result = grant_locked(&mut tx, user_id, grant, reason, detail).await;
        let result = finish(tx, result).await?;

        info!("Granted {} permanent credits to {} for {}", amount, user_id, reason);
        Ok(result)
    }

    /// Returns credits for a post that was paid for but never delivered,
    /// restoring each tier by what the debit took from it.
    pub async fn refund(
        &self,
        user_id: &str,
        debit: &DeductResult,
        detail: Option<&str>,
    ) -> Result<GrantResult, CoreError> {
        if debit.credits_deducted < 0 || debit.permanent_credits_deducted < 0 {
            return Err(CoreError::invalid_input(format!(
                "refund tiers must be non-negative, got {} / {}",
                debit.credits_deducted, debit.permanent_credits_deducted
            )));
        }
        let restore = CreditAccount {
            credits: debit.credits_deducted,
            permanent_credits: debit.permanent_credits_deducted,
        };
        require_positive(restore.available()?)?;

        let mut tx = begin(&self.pool).await?;
        let result = grant_locked(&mut tx, user_id, restore, CreditReason::Refund, detail).await;
        let result = finish(tx, result).await?;

        info!(
            "Refunded {} expiring and {} permanent credits to {}",
            restore.credits, restore.permanent_credits, user_id
        );
        Ok(result)
    }

    /// Replaces the expiring balance with this period's allowance.
    pub async fn set_monthly_allowance(
        &self,
        user_id: &str,
        credits: i64,
    ) -> Result<CreditAccount, CoreError> {
        if credits < 0 {
            return Err(CoreError::invalid_input(format!(
                "monthly allowance must be non-negative, got {}",
                credits
            )));
        }

        let mut tx = begin(&self.pool).await?;
        let result = allowance_locked(&mut tx, user_id, credits).await;
        finish(tx, result).await
    }
}

fn require_positive(amount: i64) -> Result<(), CoreError> {
    if amount <= 0 {
        return Err(CoreError::invalid_input(format!(
            "credit amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Takes the write lock before anything is read, so concurrent writers
/// queue on the busy timeout instead of racing a read-check-write.
async fn lock_account(conn: &mut SqliteConnection, user_id: &str) -> Result<(), CoreError> {
    sqlx::query("UPDATE credit_accounts SET updated_at = updated_at WHERE user_id = ?1")
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(lock_error)?;
    Ok(())
}

fn overflow(user_id: &str) -> CoreError {
    CoreError::invalid_input(format!("credit balance of {} would overflow", user_id))
}

async fn read_account(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<CreditAccount, CoreError> {
    let row = sqlx::query(
        "SELECT credits, permanent_credits FROM credit_accounts WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CoreError::not_found(format!("credit account {}", user_id)))?;

    Ok(CreditAccount {
        credits: row.try_get("credits")?,
        permanent_credits: row.try_get("permanent_credits")?,
    })
}

async fn write_balances(
    conn: &mut SqliteConnection,
    user_id: &str,
    account: CreditAccount,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE credit_accounts SET credits = ?1, permanent_credits = ?2, updated_at = ?3 \
         WHERE user_id = ?4",
    )
    .bind(account.credits)
    .bind(account.permanent_credits)
    .bind(Utc::now())
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn append_entry(
    conn: &mut SqliteConnection,
    user_id: &str,
    previous_total: i64,
    new_total: i64,
    reason: CreditReason,
    detail: Option<&str>,
) -> Result<i64, CoreError> {
    let id = sqlx::query(
        "INSERT INTO credit_ledger (user_id, delta, previous_total, new_total, reason, detail, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(user_id)
    .bind(new_total - previous_total)
    .bind(previous_total)
    .bind(new_total)
    .bind(reason.as_str())
    .bind(detail)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(
        "Ledger entry {} for {}: {} -> {} ({})",
        id, user_id, previous_total, new_total, reason
    );
    Ok(id)
}

async fn open_locked(
    conn: &mut SqliteConnection,
    user_id: &str,
    credits: i64,
    permanent_credits: i64,
    opening: i64,
) -> Result<CreditAccount, CoreError> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO credit_accounts (user_id, credits, permanent_credits, updated_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(user_id)
    .bind(credits)
    .bind(permanent_credits)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(lock_error)?
    .rows_affected();

    if inserted == 1 && opening > 0 {
        append_entry(
            conn,
            user_id,
            0,
            opening,
            CreditReason::AdminAdjustment,
            Some("opening balance"),
        )
        .await?;
    }

    read_account(conn, user_id).await
}

async fn deduct_locked(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: i64,
    reason: CreditReason,
    options: &DeductOptions,
) -> Result<DeductResult, CoreError> {
    lock_account(conn, user_id).await?;
    let account = read_account(conn, user_id).await?;
    let available = account.available()?;

    if available < amount {
        let shortfall = CreditError::Insufficient {
            required: amount,
            available,
        };
        if options.throw_on_insufficient {
            return Err(shortfall.into());
        }
        return Ok(DeductResult {
            success: false,
            credits_deducted: 0,
            permanent_credits_deducted: 0,
            balance: account,
            ledger_entry_id: None,
            error: Some(shortfall.to_string()),
        });
    }

    let from_credits = account.credits.min(amount);
    let from_permanent = amount - from_credits;
    let balance = CreditAccount {
        credits: account.credits - from_credits,
        permanent_credits: account.permanent_credits - from_permanent,
    };

    write_balances(conn, user_id, balance).await?;
    let entry_id = append_entry(
        conn,
        user_id,
        available,
        balance.available()?,
        reason,
        options.detail.as_deref(),
    )
    .await?;

    Ok(DeductResult {
        success: true,
        credits_deducted: from_credits,
        permanent_credits_deducted: from_permanent,
        balance,
        ledger_entry_id: Some(entry_id),
        error: None,
    })
}

async fn grant_locked(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: CreditAccount,
    reason: CreditReason,
    detail: Option<&str>,
) -> Result<GrantResult, CoreError> {
    lock_account(conn, user_id).await?;
    let account = read_account(conn, user_id).await?;
    let balance = CreditAccount {
        credits: account
            .credits
            .checked_add(amount.credits)
            .ok_or_else(|| overflow(user_id))?,
        permanent_credits: account
            .permanent_credits
            .checked_add(amount.permanent_credits)
            .ok_or_else(|| overflow(user_id))?,
    };
    let new_total = balance.available().map_err(|_| overflow(user_id))?;

    write_balances(conn, user_id, balance).await?;
    let ledger_entry_id = append_entry(
        conn,
        user_id,
        account.available()?,
        new_total,
        reason,
        detail,
    )
    .await?;

    Ok(GrantResult {
        balance,
        ledger_entry_id,
    })
}

async fn allowance_locked(
    conn: &mut SqliteConnection,
    user_id: &str,
    credits: i64,
) -> Result<CreditAccount, CoreError> {
    lock_account(conn, user_id).await?;
    let account = read_account(conn, user_id).await?;
    let balance = CreditAccount {
        credits,
        permanent_credits: account.permanent_credits,
    };
    let new_total = balance.available().map_err(|_| overflow(user_id))?;

    write_balances(conn, user_id, balance).await?;
    append_entry(
        conn,
        user_id,
        account.available()?,
        new_total,
        CreditReason::MonthlyAllowance,
        None,
    )
    .await?;
    Ok(balance)
}

fn entry_from_row(row: &SqliteRow) -> Result<CreditLedgerEntry, CoreError> {
    let reason: String = row.try_get("reason")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(CreditLedgerEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        delta: row.try_get("delta")?,
        previous_total: row.try_get("previous_total")?,
        new_total: row.try_get("new_total")?,
        reason: CreditReason::parse(&reason).ok_or_else(|| CoreError::Internal {
            message: format!("unknown credit reason {:?} in ledger", reason),
        })?,
        detail: row.try_get("detail")?,
        created_at,
    })
}
