//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerError (ledger-core) ← What engine callers match on              │
//! │       • Conflict          → ConcurrencyConflict (retryable)            │
//! │       • NotFound          → NotFound                                   │
//! │       • UniqueViolation   → Validation(Duplicate)                      │
//! │       • everything else   → Persistence                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use ledger_core::{LedgerError, ValidationError};
use thiserror::Error;

/// SQLite result codes that mean "another writer holds the lock".
///
/// SQLITE_BUSY (5), SQLITE_LOCKED (6), and their extended forms
/// BUSY_RECOVERY (261), LOCKED_SHAREDCACHE (262), BUSY_SNAPSHOT (517).
const LOCK_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a duplicate SKU or deposit type name
    /// - Reference collision on a deposit or document number
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A concurrent writer got there first.
    ///
    /// ## When This Occurs
    /// - A versioned UPDATE matched zero rows
    /// - SQLite reported BUSY/LOCKED while upgrading to a write lock
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed (includes CHECK constraint and trigger aborts).
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use until the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Stale-version error for a versioned update.
    pub fn stale(entity: &str, id: &str) -> Self {
        DbError::Conflict(format!("{entity} {id} was modified concurrently"))
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Lock codes → Conflict, else by message
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let locked = db_err
                    .code()
                    .map(|code| LOCK_CODES.iter().any(|c| *c == code))
                    .unwrap_or(false);

                if locked || msg.contains("database is locked") || msg.contains("database table is locked") {
                    DbError::Conflict(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => LedgerError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => {
                LedgerError::Validation(ValidationError::Duplicate { field, value })
            }
            DbError::Conflict(msg) => LedgerError::ConcurrencyConflict(msg),
            other => LedgerError::Persistence(other.to_string()),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::ErrorKind;

    #[test]
    fn test_conflict_maps_to_retryable_ledger_error() {
        let err: LedgerError = DbError::stale("Product", "p-1").into();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_persistence() {
        let err: LedgerError = DbError::from(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_duplicate_maps_to_validation() {
        let err: LedgerError = DbError::duplicate("sku", "CRATE-24").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
