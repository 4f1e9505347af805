//! # Stock Movement Repository
//!
//! Append and read the stock ledger. There is deliberately no update or
//! delete here, and the schema's triggers reject both.
//!
//! ## Keyset Pagination
//! ```text
//! seq:   41  38  37  30  22  19  ...        newest first
//!        └──page 1──┘└──page 2──┘
//!                 ▲
//!                 cursor = 37  →  next page: WHERE seq < 37
//! ```
//! A cursor stays valid while new movements are appended: they get higher
//! `seq` values and never shift older pages.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DbResult;
use ledger_core::{MovementCursor, MovementFilter, StockMovement};

/// Per-day movement volume, for reporting timelines.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DailyMovement {
    /// `YYYY-MM-DD` (UTC).
    pub day: String,
    pub quantity_in: i64,
    pub quantity_out: i64,
    pub movement_count: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MovementRepository;

impl MovementRepository {
    /// Appends a movement and returns its assigned `seq`.
    pub async fn append(&self, conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, direction, quantity, previous_stock, new_stock,
                reason, reference, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.product_id)
        .bind(movement.direction)
        .bind(movement.quantity)
        .bind(movement.previous_stock)
        .bind(movement.new_stock)
        .bind(&movement.reason)
        .bind(&movement.reference)
        .bind(&movement.actor_id)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// One page of a product's movements, newest first.
    ///
    /// `from` is inclusive, `to` exclusive.
    pub async fn page_for_product(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: u32,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT seq, id, product_id, direction, quantity, previous_stock, new_stock,
                   reason, reference, actor_id, created_at
            FROM stock_movements
            WHERE product_id = ?1
              AND (?2 IS NULL OR seq < ?2)
              AND (?3 IS NULL OR direction = ?3)
              AND (?4 IS NULL OR created_at >= ?4)
              AND (?5 IS NULL OR created_at < ?5)
            ORDER BY seq DESC
            LIMIT ?6
            "#,
        )
        .bind(product_id)
        .bind(after.map(|c| c.0))
        .bind(filter.direction)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(movements)
    }

    /// Every movement a document produced, in booking order.
    pub async fn by_reference(&self, conn: &mut SqliteConnection, reference: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT seq, id, product_id, direction, quantity, previous_stock, new_stock,
                   reason, reference, actor_id, created_at
            FROM stock_movements
            WHERE reference = ?1
            ORDER BY seq
            "#,
        )
        .bind(reference)
        .fetch_all(&mut *conn)
        .await?;

        Ok(movements)
    }

    /// `Σ in − Σ out` over a product's whole history.
    pub async fn signed_sum(&self, conn: &mut SqliteConnection, product_id: &str) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE direction WHEN 'in' THEN quantity ELSE -quantity END), 0)
            FROM stock_movements
            WHERE product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(sum)
    }

    /// Movements whose rows break `new = prev ± qty` or whose `prev` does not
    /// chain onto the previous movement's `new`.
    pub async fn broken_chain_count(&self, conn: &mut SqliteConnection, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM (
                SELECT previous_stock,
                       LAG(new_stock) OVER (ORDER BY seq) AS prior_new
                FROM stock_movements
                WHERE product_id = ?1
            )
            WHERE prior_new IS NOT NULL AND prior_new != previous_stock
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    /// Daily in/out volume over `[from, to)`.
    pub async fn daily_totals(
        &self,
        conn: &mut SqliteConnection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<DailyMovement>> {
        let days = sqlx::query_as::<_, DailyMovement>(
            r#"
            SELECT substr(created_at, 1, 10)                                        AS day,
                   COALESCE(SUM(CASE direction WHEN 'in'  THEN quantity END), 0)   AS quantity_in,
                   COALESCE(SUM(CASE direction WHEN 'out' THEN quantity END), 0)   AS quantity_out,
                   COUNT(*)                                                         AS movement_count
            FROM stock_movements
            WHERE created_at >= ?1 AND created_at < ?2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await?;

        Ok(days)
    }
}
