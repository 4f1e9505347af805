//! # Counterparty Repository
//!
//! Customers and suppliers share a row shape and live in separate tables.
//! The table is picked from [`CounterpartyKind`].

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};
use ledger_core::{CounterpartyKind, Party};

#[derive(Debug, Clone, Copy, Default)]
pub struct PartyRepository;

impl PartyRepository {
    pub async fn insert(&self, conn: &mut SqliteConnection, kind: CounterpartyKind, party: &Party) -> DbResult<()> {
        let sql = match kind {
            CounterpartyKind::Customer => {
                "INSERT INTO customers (id, name, balance_cents, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
            CounterpartyKind::Supplier => {
                "INSERT INTO suppliers (id, name, balance_cents, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
        };

        sqlx::query(sql)
            .bind(&party.id)
            .bind(&party.name)
            .bind(party.balance_cents)
            .bind(party.is_active)
            .bind(party.created_at)
            .bind(party.updated_at)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn get_by_id(
        &self,
        conn: &mut SqliteConnection,
        kind: CounterpartyKind,
        id: &str,
    ) -> DbResult<Option<Party>> {
        let sql = match kind {
            CounterpartyKind::Customer => {
                "SELECT id, name, balance_cents, is_active, created_at, updated_at
                 FROM customers WHERE id = ?1"
            }
            CounterpartyKind::Supplier => {
                "SELECT id, name, balance_cents, is_active, created_at, updated_at
                 FROM suppliers WHERE id = ?1"
            }
        };

        let party = sqlx::query_as::<_, Party>(sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(party)
    }

    pub async fn require(&self, conn: &mut SqliteConnection, kind: CounterpartyKind, id: &str) -> DbResult<Party> {
        let entity = match kind {
            CounterpartyKind::Customer => "Customer",
            CounterpartyKind::Supplier => "Supplier",
        };
        self.get_by_id(conn, kind, id)
            .await?
            .ok_or_else(|| DbError::not_found(entity, id))
    }

    /// Adds `delta_cents` to the running balance.
    ///
    /// The increment happens in SQL, so concurrent postings add up without
    /// a version check.
    pub async fn adjust_balance(
        &self,
        conn: &mut SqliteConnection,
        kind: CounterpartyKind,
        id: &str,
        delta_cents: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = match kind {
            CounterpartyKind::Customer => {
                "UPDATE customers SET balance_cents = balance_cents + ?1, updated_at = ?2 WHERE id = ?3"
            }
            CounterpartyKind::Supplier => {
                "UPDATE suppliers SET balance_cents = balance_cents + ?1, updated_at = ?2 WHERE id = ?3"
            }
        };

        let result = sqlx::query(sql)
            .bind(delta_cents)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(kind.to_string(), id));
        }

        Ok(())
    }
}
