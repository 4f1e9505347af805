//! # Document Repository
//!
//! Headers and frozen lines of sales, purchase receipts and adjustments.
//! A document's `number` is the `reference` on every movement it booked.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};
use ledger_core::{Counterparty, CounterpartyKind, Document, DocumentKind, DocumentLine, PaymentTerms};

#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    number: String,
    kind: DocumentKind,
    counterparty_kind: Option<CounterpartyKind>,
    counterparty_id: Option<String>,
    terms: PaymentTerms,
    total_cents: i64,
    reason: Option<String>,
    actor_id: String,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        let counterparty = match (row.counterparty_kind, row.counterparty_id) {
            (Some(kind), Some(id)) => Some(Counterparty::from_parts(kind, id)),
            _ => None,
        };

        Document {
            id: row.id,
            number: row.number,
            kind: row.kind,
            counterparty,
            terms: row.terms,
            total_cents: row.total_cents,
            reason: row.reason,
            actor_id: row.actor_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentRepository;

impl DocumentRepository {
    pub async fn insert(&self, conn: &mut SqliteConnection, document: &Document) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (
                id, number, kind, counterparty_kind, counterparty_id, terms,
                total_cents, reason, actor_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&document.id)
        .bind(&document.number)
        .bind(document.kind)
        .bind(document.counterparty.as_ref().map(|cp| cp.kind()))
        .bind(document.counterparty.as_ref().map(|cp| cp.id()))
        .bind(document.terms)
        .bind(document.total_cents)
        .bind(&document.reason)
        .bind(&document.actor_id)
        .bind(document.created_at)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DbError::from(e) {
                DbError::UniqueViolation { .. } => Err(DbError::duplicate("number", &document.number)),
                other => Err(other),
            },
        }
    }

    pub async fn insert_line(&self, conn: &mut SqliteConnection, line: &DocumentLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO document_lines (
                id, document_id, product_id, direction, quantity,
                unit_amount_cents, line_total_cents, deposit_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&line.id)
        .bind(&line.document_id)
        .bind(&line.product_id)
        .bind(line.direction)
        .bind(line.quantity)
        .bind(line.unit_amount_cents)
        .bind(line.line_total_cents)
        .bind(&line.deposit_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn number_exists(&self, conn: &mut SqliteConnection, number: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM documents WHERE number = ?1)")
            .bind(number)
            .fetch_one(&mut *conn)
            .await?;

        Ok(exists)
    }

    pub async fn get_by_number(&self, conn: &mut SqliteConnection, number: &str) -> DbResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, number, kind, counterparty_kind, counterparty_id, terms,
                   total_cents, reason, actor_id, created_at
            FROM documents
            WHERE number = ?1
            "#,
        )
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Document::from))
    }

    /// Lines of a document in insertion order.
    pub async fn lines(&self, conn: &mut SqliteConnection, document_id: &str) -> DbResult<Vec<DocumentLine>> {
        let lines = sqlx::query_as::<_, DocumentLine>(
            r#"
            SELECT id, document_id, product_id, direction, quantity,
                   unit_amount_cents, line_total_cents, deposit_id
            FROM document_lines
            WHERE document_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(lines)
    }
}
