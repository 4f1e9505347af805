//! # Validation Module
//!
//! Input validation for ledger operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Field shape (empty, length, sign, range)                          │
//! │  └── Runs before the engine opens a write                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: ledger-engine                                                │
//! │  └── Rules that need state (stock, pending quantity, status)           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (quantity > 0, stock >= 0)                      │
//! │  ├── UNIQUE constraints (sku, deposit reference)                       │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ledger_core::validation::{validate_quantity, validate_reason, validate_sku};
//!
//! validate_sku("CRATE-24").unwrap();
//! validate_quantity(5).unwrap();
//! assert!(validate_reason("   ").is_err());
//! ```

use crate::error::ValidationError;
use crate::MAX_MOVEMENT_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted movement reason.
pub const MAX_REASON_LEN: usize = 255;

/// Largest accepted unit amount (price, cost, deposit) in cents.
///
/// A full document of `MAX_DOCUMENT_LINES` lines at `MAX_MOVEMENT_QUANTITY`
/// units, goods plus packaging, stays well inside `i64` at this bound.
pub const MAX_AMOUNT_CENTS: i64 = 10_000_000_000;

// =============================================================================
// String Validators
// =============================================================================

fn required(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use ledger_core::validation::validate_sku;
///
/// assert!(validate_sku("CRATE-24").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    required("sku", sku, 50)?;

    if !sku
        .trim()
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name: non-empty, at most 200 characters.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    required("name", name, 200)
}

/// Validates a deposit type name: non-empty, at most 100 characters.
pub fn validate_deposit_type_name(name: &str) -> ValidationResult<()> {
    required("deposit type name", name, 100)
}

/// Validates a counterparty display name.
pub fn validate_party_name(name: &str) -> ValidationResult<()> {
    required("name", name, 200)
}

/// Every movement must say why it happened.
///
/// ## Example
/// ```rust
/// use ledger_core::validation::validate_reason;
///
/// assert!(validate_reason("damaged in transit").is_ok());
/// assert!(validate_reason("").is_err());
/// ```
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    required("reason", reason, MAX_REASON_LEN)
}

/// The acting user is recorded on every movement.
pub fn validate_actor_id(actor_id: &str) -> ValidationResult<()> {
    required("actor", actor_id, 64)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a movement, deposit or return quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed [`MAX_MOVEMENT_QUANTITY`]
///
/// ```text
/// add_stock(qty: 0)
///      │
///      ▼
/// validate_quantity(0) ──► MustBePositive, nothing written
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_MOVEMENT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an amount in cents (price, cost, deposit amount).
///
/// Zero is allowed: free samples and zero-deposit packaging exist.
///
/// ## Example
/// ```rust
/// use ledger_core::validation::validate_amount_cents;
///
/// assert!(validate_amount_cents("price", 1099).is_ok());
/// assert!(validate_amount_cents("price", 0).is_ok());
/// assert!(validate_amount_cents("price", -100).is_err());
/// assert!(validate_amount_cents("price", i64::MAX / 2).is_err());
/// ```
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_AMOUNT_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(())
}

/// Low-stock thresholds are non-negative.
pub fn validate_min_stock(min_stock: i64) -> ValidationResult<()> {
    if min_stock < 0 {
        return Err(ValidationError::OutOfRange {
            field: "min stock".to_string(),
            min: 0,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }

    Ok(())
}

/// A counted quantity may be zero, never negative.
pub fn validate_counted(counted: i64) -> ValidationResult<()> {
    if !(0..=MAX_MOVEMENT_QUANTITY).contains(&counted) {
        return Err(ValidationError::OutOfRange {
            field: "counted quantity".to_string(),
            min: 0,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Documents carry between 1 and [`crate::MAX_DOCUMENT_LINES`] lines.
pub fn validate_line_count(lines: usize) -> ValidationResult<()> {
    if lines == 0 {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if lines > crate::MAX_DOCUMENT_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: crate::MAX_DOCUMENT_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use ledger_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("CRATE-24").is_ok());
        assert!(validate_sku("bottle_05").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_amount_cents_bounds() {
        assert!(validate_amount_cents("deposit amount", 0).is_ok());
        assert!(validate_amount_cents("deposit amount", MAX_AMOUNT_CENTS).is_ok());

        for cents in [-1, MAX_AMOUNT_CENTS + 1, i64::MAX / 2, i64::MAX] {
            assert!(matches!(
                validate_amount_cents("deposit amount", cents),
                Err(ValidationError::OutOfRange { max: MAX_AMOUNT_CENTS, .. })
            ));
        }

        // Worst case document total fits.
        let worst = MAX_AMOUNT_CENTS
            .checked_mul(MAX_MOVEMENT_QUANTITY)
            .and_then(|line| line.checked_mul(2 * crate::MAX_DOCUMENT_LINES as i64));
        assert!(worst.is_some());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY).is_ok());

        assert!(matches!(
            validate_quantity(0),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(validate_quantity(-1).is_err());
        assert!(matches!(
            validate_quantity(MAX_MOVEMENT_QUANTITY + 1),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_reason() {
        assert!(validate_reason("restock").is_ok());
        assert!(matches!(
            validate_reason("  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_reason(&"x".repeat(MAX_REASON_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_amount_cents("amount", 0).is_ok());
        assert!(validate_amount_cents("amount", -1).is_err());
        assert!(validate_min_stock(0).is_ok());
        assert!(validate_min_stock(-5).is_err());
        assert!(validate_counted(0).is_ok());
        assert!(validate_counted(-1).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(1).is_ok());
        assert!(validate_line_count(0).is_err());
        assert!(validate_line_count(crate::MAX_DOCUMENT_LINES + 1).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("123").is_err());
    }
}
