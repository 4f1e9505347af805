//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Stock Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Optimistic stock update                                                │
//! │                                                                         │
//! │  read:   SELECT ... WHERE id = 'p-1'          → stock 10, version 7    │
//! │  check:  ledger-core::stock::next_stock        → 4                     │
//! │  write:  UPDATE products                                               │
//! │          SET current_stock = 4, version = version + 1                  │
//! │          WHERE id = 'p-1' AND version = 7                              │
//! │                                                                         │
//! │  rows_affected == 0  →  someone else moved this product first          │
//! │                      →  DbError::Conflict, engine retries              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use ledger_core::Product;

/// Inventory totals over active products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct StockTotals {
    pub product_count: i64,
    pub units_on_hand: i64,
    pub cost_value_cents: i64,
    pub sell_value_cents: i64,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
}

/// Repository for product database operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductRepository;

impl ProductRepository {
    /// Inserts a product row as given.
    pub async fn insert(&self, conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, current_stock, min_stock, cost_cents, price_cents,
                is_active, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.current_stock)
        .bind(product.min_stock)
        .bind(product.cost_cents)
        .bind(product.price_cents)
        .bind(product.is_active)
        .bind(product.version)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { .. } => Err(DbError::duplicate("sku", &product.sku)),
                other => Err(other),
            },
        }
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, current_stock, min_stock, cost_cents, price_cents,
                   is_active, version, created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Gets a product by ID or fails with `NotFound`.
    pub async fn require(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Product> {
        self.get_by_id(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Gets a product by its SKU.
    pub async fn get_by_sku(&self, conn: &mut SqliteConnection, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, current_stock, min_stock, cost_cents, price_cents,
                   is_active, version, created_at, updated_at
            FROM products
            WHERE sku = ?1
            "#,
        )
        .bind(sku)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Lists active products sorted by name.
    pub async fn list_active(&self, conn: &mut SqliteConnection) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, current_stock, min_stock, cost_cents, price_cents,
                   is_active, version, created_at, updated_at
            FROM products
            WHERE is_active = 1
            ORDER BY name, id
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(products)
    }

    /// Active products at or below their threshold but not empty, lowest first.
    pub async fn list_low_stock(&self, conn: &mut SqliteConnection) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, current_stock, min_stock, cost_cents, price_cents,
                   is_active, version, created_at, updated_at
            FROM products
            WHERE is_active = 1
              AND current_stock > 0
              AND current_stock <= min_stock
            ORDER BY current_stock, name
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(products)
    }

    /// Writes a new stock level if the row is still at `expected_version`.
    ///
    /// ## Errors
    /// `DbError::Conflict` when the version moved.
    pub async fn update_stock(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        new_stock: i64,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = ?1, version = version + 1, updated_at = ?2
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(new_stock)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("Product", id));
        }

        Ok(())
    }

    /// Soft-retires or reactivates a product.
    pub async fn set_active(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        active: bool,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET is_active = ?1, version = version + 1, updated_at = ?2
            WHERE id = ?3 AND version = ?4
            "#,
        )
        .bind(active)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("Product", id));
        }

        Ok(())
    }

    /// Inventory totals over active products.
    pub async fn stock_totals(&self, conn: &mut SqliteConnection) -> DbResult<StockTotals> {
        let totals = sqlx::query_as::<_, StockTotals>(
            r#"
            SELECT
                COUNT(*)                                         AS product_count,
                COALESCE(SUM(current_stock), 0)                  AS units_on_hand,
                COALESCE(SUM(current_stock * cost_cents), 0)     AS cost_value_cents,
                COALESCE(SUM(current_stock * price_cents), 0)    AS sell_value_cents,
                COALESCE(SUM(CASE WHEN current_stock > 0 AND current_stock <= min_stock
                                  THEN 1 ELSE 0 END), 0)         AS low_stock_count,
                COALESCE(SUM(CASE WHEN current_stock = 0
                                  THEN 1 ELSE 0 END), 0)         AS out_of_stock_count
            FROM products
            WHERE is_active = 1
            "#,
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(totals)
    }
}
