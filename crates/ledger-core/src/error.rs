//! # Error Types
//!
//! The error taxonomy of the stock ledger.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ledger-core errors (this file)                                        │
//! │  ├── LedgerError      - Every engine operation returns this            │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  ledger-db errors (separate crate)                                     │
//! │  └── DbError          - Database failures, mapped into LedgerError     │
//! │                                                                         │
//! │  Flow: ValidationError → LedgerError ← DbError                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! Every operation returns a definite success or a definite typed error.
//! Only [`LedgerError::ConcurrencyConflict`] is retryable; everything else
//! needs corrected input or operator intervention.

use thiserror::Error;

use crate::types::DepositStatus;

// =============================================================================
// Ledger Error
// =============================================================================

/// Errors returned by every stock ledger and deposit operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input failed validation before anything was written.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown product, deposit, deposit type or counterparty.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Removal or sale exceeds the product's available stock.
    ///
    /// ## User Workflow
    /// ```text
    /// remove_stock(qty: 6)
    ///      │
    ///      ▼
    /// Check stock: available=4
    ///      │
    ///      ▼
    /// InsufficientStock { available: 4, requested: 6 }
    ///      │
    ///      ▼
    /// Nothing written, stock still 4
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// An outgoing deposit needs more packaging than is in circulation.
    #[error("Insufficient deposit stock for type {deposit_type_id}: available {available}, requested {requested}")]
    InsufficientDepositStock {
        deposit_type_id: String,
        available: i64,
        requested: i64,
    },

    /// Return quantity exceeds the deposit's pending quantity.
    #[error("Cannot return {requested} on deposit {deposit_id}: only {pending} pending")]
    OverReturn {
        deposit_id: String,
        pending: i64,
        requested: i64,
    },

    /// Illegal state machine move, e.g. cancelling a returned deposit.
    #[error("Deposit {deposit_id} is {status}, cannot {action}")]
    InvalidTransition {
        deposit_id: String,
        status: DepositStatus,
        action: String,
    },

    /// A concurrent writer changed the same row first. Retry the whole operation.
    #[error("Concurrent modification detected: {0}")]
    ConcurrencyConflict(String),

    /// Underlying store failure (connection, timeout, unclassified constraint).
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Coarse classification of [`LedgerError`] for callers mapping errors to
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    OverReturn,
    InvalidTransition,
    ConcurrencyConflict,
    Persistence,
}

impl LedgerError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns the taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::InsufficientStock { .. } | LedgerError::InsufficientDepositStock { .. } => {
                ErrorKind::InsufficientStock
            }
            LedgerError::OverReturn { .. } => ErrorKind::OverReturn,
            LedgerError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LedgerError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            LedgerError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// True only for errors the caller should retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Raised before any mutation so a failed call writes nothing.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two fields disagree (e.g., an incoming deposit with a customer).
    #[error("{field} is inconsistent: {reason}")]
    Inconsistent { field: String, reason: String },

    /// Referenced entity is retired and cannot take new activity.
    #[error("{entity} {id} is inactive")]
    Inactive { entity: String, id: String },

    /// Entity is still referenced and cannot be deleted.
    #[error("{entity} {id} is referenced by {references} record(s)")]
    InUse {
        entity: String,
        id: String,
        references: i64,
    },

    /// Duplicate value (e.g., duplicate SKU).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with LedgerError.
pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LedgerError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-1: available 3, requested 5"
        );

        let err = LedgerError::InvalidTransition {
            deposit_id: "d-1".to_string(),
            status: DepositStatus::Returned,
            action: "cancel".to_string(),
        };
        assert_eq!(err.to_string(), "Deposit d-1 is returned, cannot cancel");
    }

    #[test]
    fn test_kind_groups_both_stock_shortages() {
        let product = LedgerError::InsufficientStock {
            product_id: "p".into(),
            available: 0,
            requested: 1,
        };
        let packaging = LedgerError::InsufficientDepositStock {
            deposit_type_id: "t".into(),
            available: 0,
            requested: 1,
        };
        assert_eq!(product.kind(), ErrorKind::InsufficientStock);
        assert_eq!(packaging.kind(), ErrorKind::InsufficientStock);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::ConcurrencyConflict("product p".into()).is_retryable());
        assert!(!LedgerError::Persistence("disk full".into()).is_retryable());
        assert!(!LedgerError::not_found("Product", "p").is_retryable());
    }

    #[test]
    fn test_validation_converts_to_ledger_error() {
        let validation_err = ValidationError::Required {
            field: "reason".to_string(),
        };
        let err: LedgerError = validation_err.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Validation error: reason is required");
    }
}
