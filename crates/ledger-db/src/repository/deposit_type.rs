//! # Deposit Type Repository
//!
//! Catalogue of returnable packaging (crates, kegs, bottles) and the live
//! circulation query behind `quantity_in_stock`.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};
use ledger_core::DepositType;

/// Packaging of one type, split by where it is.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TypeCirculation {
    pub deposit_type_id: String,
    pub name: String,
    /// Σ quantity of active incoming deposits.
    pub received: i64,
    /// Σ quantity_pending of open outgoing deposits.
    pub issued_pending: i64,
    /// Σ quantity_pending of open incoming deposits.
    pub owed_back: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepositTypeRepository;

impl DepositTypeRepository {
    pub async fn insert(&self, conn: &mut SqliteConnection, deposit_type: &DepositType) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposit_types (id, name, amount_cents, is_active, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&deposit_type.id)
        .bind(&deposit_type.name)
        .bind(deposit_type.amount_cents)
        .bind(deposit_type.is_active)
        .bind(deposit_type.version)
        .bind(deposit_type.created_at)
        .bind(deposit_type.updated_at)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { .. } => {
                    Err(DbError::duplicate("deposit type name", &deposit_type.name))
                }
                other => Err(other),
            },
        }
    }

    pub async fn get_by_id(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<DepositType>> {
        let row = sqlx::query_as::<_, DepositType>(
            r#"
            SELECT id, name, amount_cents, is_active, version, created_at, updated_at
            FROM deposit_types
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row)
    }

    pub async fn require(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<DepositType> {
        self.get_by_id(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("DepositType", id))
    }

    /// Lists deposit types by name. Retired types only when asked.
    pub async fn list(&self, conn: &mut SqliteConnection, include_inactive: bool) -> DbResult<Vec<DepositType>> {
        let rows = sqlx::query_as::<_, DepositType>(
            r#"
            SELECT id, name, amount_cents, is_active, version, created_at, updated_at
            FROM deposit_types
            WHERE ?1 OR is_active = 1
            ORDER BY name
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }

    /// Writes name, amount and active flag if the row is still at `expected_version`.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        deposit_type: &DepositType,
        expected_version: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_types
            SET name = ?1, amount_cents = ?2, is_active = ?3,
                version = version + 1, updated_at = ?4
            WHERE id = ?5 AND version = ?6
            "#,
        )
        .bind(&deposit_type.name)
        .bind(deposit_type.amount_cents)
        .bind(deposit_type.is_active)
        .bind(deposit_type.updated_at)
        .bind(&deposit_type.id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                return match DbError::from(e) {
                    DbError::UniqueViolation { .. } => {
                        Err(DbError::duplicate("deposit type name", &deposit_type.name))
                    }
                    other => Err(other),
                }
            }
        };

        if result.rows_affected() == 0 {
            return Err(DbError::stale("DepositType", &deposit_type.id));
        }

        Ok(())
    }

    /// Claims the type for an issuing write.
    ///
    /// Two transactions issuing the same type both read the same version;
    /// the second bump fails, so their stock checks cannot both pass.
    pub async fn bump_version(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_types
            SET version = version + 1, updated_at = ?1
            WHERE id = ?2 AND version = ?3
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("DepositType", id));
        }

        Ok(())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM deposit_types WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("DepositType", id));
        }

        Ok(())
    }

    /// Number of deposits (any status) that reference the type.
    pub async fn reference_count(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deposits WHERE deposit_type_id = ?1")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }

    /// Raw circulation figure, before clamping:
    /// `Σ incoming.quantity (active) − Σ outgoing.quantity_pending (active|partial)`.
    pub async fn raw_quantity_in_stock(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<i64> {
        let raw: i64 = sqlx::query_scalar(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN direction = 'incoming' AND status = 'active'
                                  THEN quantity ELSE 0 END), 0)
              - COALESCE(SUM(CASE WHEN direction = 'outgoing' AND status IN ('active', 'partial')
                                  THEN quantity_pending ELSE 0 END), 0)
            FROM deposits
            WHERE deposit_type_id = ?1
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(raw)
    }

    /// Circulation breakdown for every type, retired ones included.
    pub async fn circulation(&self, conn: &mut SqliteConnection) -> DbResult<Vec<TypeCirculation>> {
        let rows = sqlx::query_as::<_, TypeCirculation>(
            r#"
            SELECT
                t.id   AS deposit_type_id,
                t.name AS name,
                COALESCE(SUM(CASE WHEN d.direction = 'incoming' AND d.status = 'active'
                                  THEN d.quantity ELSE 0 END), 0)          AS received,
                COALESCE(SUM(CASE WHEN d.direction = 'outgoing' AND d.status IN ('active', 'partial')
                                  THEN d.quantity_pending ELSE 0 END), 0)  AS issued_pending,
                COALESCE(SUM(CASE WHEN d.direction = 'incoming' AND d.status IN ('active', 'partial')
                                  THEN d.quantity_pending ELSE 0 END), 0)  AS owed_back
            FROM deposit_types t
            LEFT JOIN deposits d ON d.deposit_type_id = t.id
            GROUP BY t.id, t.name
            ORDER BY t.name
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows)
    }
}
