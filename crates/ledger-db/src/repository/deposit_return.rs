//! # Deposit Return Repository
//!
//! Append-only log of return events.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DbResult;
use ledger_core::DepositReturn;

/// Per-day return volume.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DailyReturns {
    /// `YYYY-MM-DD` (UTC).
    pub day: String,
    pub quantity: i64,
    pub refund_cents: i64,
    pub return_count: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepositReturnRepository;

impl DepositReturnRepository {
    pub async fn append(&self, conn: &mut SqliteConnection, record: &DepositReturn) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deposit_returns (id, deposit_id, quantity, refund_cents, notes, returned_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.deposit_id)
        .bind(record.quantity)
        .bind(record.refund_cents)
        .bind(&record.notes)
        .bind(record.returned_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Returns of one deposit, oldest first.
    pub async fn for_deposit(&self, conn: &mut SqliteConnection, deposit_id: &str) -> DbResult<Vec<DepositReturn>> {
        let rows = sqlx::query_as::<_, DepositReturn>(
            r#"
            SELECT id, deposit_id, quantity, refund_cents, notes, returned_at
            FROM deposit_returns
            WHERE deposit_id = ?1
            ORDER BY returned_at, rowid
            "#,
        )
        .bind(deposit_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Daily return volume over `[from, to)`.
    pub async fn daily_totals(
        &self,
        conn: &mut SqliteConnection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<DailyReturns>> {
        let rows = sqlx::query_as::<_, DailyReturns>(
            r#"
            SELECT substr(returned_at, 1, 10)       AS day,
                   COALESCE(SUM(quantity), 0)       AS quantity,
                   COALESCE(SUM(refund_cents), 0)   AS refund_cents,
                   COUNT(*)                         AS return_count
            FROM deposit_returns
            WHERE returned_at >= ?1 AND returned_at < ?2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }
}
