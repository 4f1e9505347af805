//! # Deposit Repository
//!
//! Persistence for [`Deposit`]. The counterparty is stored as a
//! `(counterparty_kind, counterparty_id)` pair and rebuilt into the
//! [`Counterparty`] enum on read.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};
use ledger_core::{
    Counterparty, CounterpartyKind, Deposit, DepositDirection, DepositFilter, DepositStatus,
};

/// Row shape of the `deposits` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DepositRow {
    id: String,
    reference: String,
    direction: DepositDirection,
    deposit_type_id: String,
    counterparty_kind: CounterpartyKind,
    counterparty_id: String,
    quantity: i64,
    quantity_pending: i64,
    quantity_returned: i64,
    unit_amount_cents: i64,
    status: DepositStatus,
    source_reference: Option<String>,
    notes: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DepositRow> for Deposit {
    fn from(row: DepositRow) -> Self {
        Deposit {
            id: row.id,
            reference: row.reference,
            direction: row.direction,
            deposit_type_id: row.deposit_type_id,
            counterparty: Counterparty::from_parts(row.counterparty_kind, row.counterparty_id),
            quantity: row.quantity,
            quantity_pending: row.quantity_pending,
            quantity_returned: row.quantity_returned,
            unit_amount_cents: row.unit_amount_cents,
            status: row.status,
            source_reference: row.source_reference,
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Outstanding packaging value, by direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct OutstandingTotals {
    /// Σ pending × unit over open outgoing deposits (we owe refunds).
    pub outgoing_cents: i64,
    /// Σ pending × unit over open incoming deposits (suppliers owe us).
    pub incoming_cents: i64,
    pub open_outgoing: i64,
    pub open_incoming: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepositRepository;

impl DepositRepository {
    pub async fn insert(&self, conn: &mut SqliteConnection, deposit: &Deposit) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposits (
                id, reference, direction, deposit_type_id, counterparty_kind, counterparty_id,
                quantity, quantity_pending, quantity_returned, unit_amount_cents, status,
                source_reference, notes, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&deposit.id)
        .bind(&deposit.reference)
        .bind(deposit.direction)
        .bind(&deposit.deposit_type_id)
        .bind(deposit.counterparty.kind())
        .bind(deposit.counterparty.id())
        .bind(deposit.quantity)
        .bind(deposit.quantity_pending)
        .bind(deposit.quantity_returned)
        .bind(deposit.unit_amount_cents)
        .bind(deposit.status)
        .bind(&deposit.source_reference)
        .bind(&deposit.notes)
        .bind(deposit.version)
        .bind(deposit.created_at)
        .bind(deposit.updated_at)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { field, .. } if field.contains("reference") => {
                    Err(DbError::duplicate("reference", &deposit.reference))
                }
                other => Err(other),
            },
        }
    }

    pub async fn get_by_id(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Deposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT id, reference, direction, deposit_type_id, counterparty_kind, counterparty_id,
                   quantity, quantity_pending, quantity_returned, unit_amount_cents, status,
                   source_reference, notes, version, created_at, updated_at
            FROM deposits
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Deposit::from))
    }

    pub async fn require(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Deposit> {
        self.get_by_id(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Deposit", id))
    }

    pub async fn get_by_reference(&self, conn: &mut SqliteConnection, reference: &str) -> DbResult<Option<Deposit>> {
        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT id, reference, direction, deposit_type_id, counterparty_kind, counterparty_id,
                   quantity, quantity_pending, quantity_returned, unit_amount_cents, status,
                   source_reference, notes, version, created_at, updated_at
            FROM deposits
            WHERE reference = ?1
            "#,
        )
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Deposit::from))
    }

    pub async fn reference_exists(&self, conn: &mut SqliteConnection, reference: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM deposits WHERE reference = ?1)")
            .bind(reference)
            .fetch_one(&mut *conn)
            .await?;

        Ok(exists)
    }

    /// Lists deposits matching every set filter, newest first.
    pub async fn list(&self, conn: &mut SqliteConnection, filter: &DepositFilter) -> DbResult<Vec<Deposit>> {
        let (kind, counterparty_id) = match &filter.counterparty {
            Some(cp) => (Some(cp.kind()), Some(cp.id())),
            None => (None, None),
        };

        let rows = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT id, reference, direction, deposit_type_id, counterparty_kind, counterparty_id,
                   quantity, quantity_pending, quantity_returned, unit_amount_cents, status,
                   source_reference, notes, version, created_at, updated_at
            FROM deposits
            WHERE (?1 IS NULL OR direction = ?1)
              AND (?2 IS NULL OR status = ?2)
              AND (?3 IS NULL OR deposit_type_id = ?3)
              AND (?4 IS NULL OR counterparty_kind = ?4)
              AND (?5 IS NULL OR counterparty_id = ?5)
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(filter.direction)
        .bind(filter.status)
        .bind(filter.deposit_type_id.as_deref())
        .bind(kind)
        .bind(counterparty_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Deposit::from).collect())
    }

    /// Writes quantities and status if the row is still at `expected_version`.
    pub async fn update_progress(
        &self,
        conn: &mut SqliteConnection,
        deposit: &Deposit,
        expected_version: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET quantity_pending = ?1, quantity_returned = ?2, status = ?3,
                version = version + 1, updated_at = ?4
            WHERE id = ?5 AND version = ?6
            "#,
        )
        .bind(deposit.quantity_pending)
        .bind(deposit.quantity_returned)
        .bind(deposit.status)
        .bind(deposit.updated_at)
        .bind(&deposit.id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("Deposit", &deposit.id));
        }

        Ok(())
    }

    /// Outstanding liability and receivable over open deposits.
    pub async fn outstanding(&self, conn: &mut SqliteConnection) -> DbResult<OutstandingTotals> {
        let totals = sqlx::query_as::<_, OutstandingTotals>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN direction = 'outgoing'
                                  THEN quantity_pending * unit_amount_cents ELSE 0 END), 0) AS outgoing_cents,
                COALESCE(SUM(CASE WHEN direction = 'incoming'
                                  THEN quantity_pending * unit_amount_cents ELSE 0 END), 0) AS incoming_cents,
                COALESCE(SUM(CASE WHEN direction = 'outgoing' THEN 1 ELSE 0 END), 0)       AS open_outgoing,
                COALESCE(SUM(CASE WHEN direction = 'incoming' THEN 1 ELSE 0 END), 0)       AS open_incoming
            FROM deposits
            WHERE status IN ('active', 'partial')
            "#,
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::deposit_type::DepositTypeRepository;
    use crate::{Database, DbConfig};
    use ledger_core::DepositType;

    fn deposit(id: &str, direction: DepositDirection, counterparty: Counterparty, qty: i64) -> Deposit {
        let now = Utc::now();
        Deposit {
            id: id.into(),
            reference: format!("REF-{id}"),
            direction,
            deposit_type_id: "t-1".into(),
            counterparty,
            quantity: qty,
            quantity_pending: qty,
            quantity_returned: 0,
            unit_amount_cents: 500,
            status: DepositStatus::Active,
            source_reference: None,
            notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> (Database, crate::DbTx) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let now = Utc::now();
        DepositTypeRepository
            .insert(
                &mut tx,
                &DepositType {
                    id: "t-1".into(),
                    name: "Beer crate".into(),
                    amount_cents: 500,
                    is_active: true,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .unwrap();
        (db, tx)
    }

    #[tokio::test]
    async fn test_counterparty_round_trips_through_columns() {
        let (_db, mut tx) = setup().await;
        let repo = DepositRepository;
        let d = deposit(
            "d-1",
            DepositDirection::Outgoing,
            Counterparty::Customer("c-1".into()),
            10,
        );
        repo.insert(&mut tx, &d).await.unwrap();

        let stored = repo.require(&mut tx, "d-1").await.unwrap();
        assert_eq!(stored.counterparty, Counterparty::Customer("c-1".into()));
        assert_eq!(stored.status, DepositStatus::Active);
        assert_eq!(stored.quantity_pending, 10);
        assert!(repo.reference_exists(&mut tx, "REF-d-1").await.unwrap());
        assert_eq!(
            repo.get_by_reference(&mut tx, "REF-d-1").await.unwrap().map(|d| d.id),
            Some("d-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_schema_rejects_mismatched_counterparty() {
        let (_db, mut tx) = setup().await;
        let d = deposit(
            "d-1",
            DepositDirection::Incoming,
            Counterparty::Customer("c-1".into()),
            10,
        );
        assert!(DepositRepository.insert(&mut tx, &d).await.is_err());
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let (_db, mut tx) = setup().await;
        let repo = DepositRepository;
        repo.insert(
            &mut tx,
            &deposit("d-1", DepositDirection::Outgoing, Counterparty::Customer("c-1".into()), 10),
        )
        .await
        .unwrap();
        repo.insert(
            &mut tx,
            &deposit("d-2", DepositDirection::Outgoing, Counterparty::Customer("c-2".into()), 5),
        )
        .await
        .unwrap();
        repo.insert(
            &mut tx,
            &deposit("d-3", DepositDirection::Incoming, Counterparty::Supplier("s-1".into()), 50),
        )
        .await
        .unwrap();

        let filter = DepositFilter {
            direction: Some(DepositDirection::Outgoing),
            counterparty: Some(Counterparty::Customer("c-2".into())),
            ..Default::default()
        };
        let found = repo.list(&mut tx, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "d-2");

        assert_eq!(repo.list(&mut tx, &DepositFilter::default()).await.unwrap().len(), 3);

        let totals = repo.outstanding(&mut tx).await.unwrap();
        assert_eq!(totals.outgoing_cents, 7500);
        assert_eq!(totals.incoming_cents, 25000);
        assert_eq!(totals.open_outgoing, 2);
        assert_eq!(totals.open_incoming, 1);
    }

    #[tokio::test]
    async fn test_update_progress_rejects_stale_version() {
        let (_db, mut tx) = setup().await;
        let repo = DepositRepository;
        let d = deposit("d-1", DepositDirection::Incoming, Counterparty::Supplier("s-1".into()), 10);
        repo.insert(&mut tx, &d).await.unwrap();

        let mut first = d.clone();
        first.quantity_pending = 6;
        first.quantity_returned = 4;
        first.status = DepositStatus::Partial;
        repo.update_progress(&mut tx, &first, 0).await.unwrap();

        // A second writer that read version 0 loses.
        let mut second = d.clone();
        second.quantity_pending = 7;
        second.quantity_returned = 3;
        second.status = DepositStatus::Partial;
        let err = repo.update_progress(&mut tx, &second, 0).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let stored = repo.require(&mut tx, "d-1").await.unwrap();
        assert_eq!((stored.quantity_pending, stored.quantity_returned), (6, 4));
        assert_eq!(stored.version, 1);
    }
}
