//! # Stock Arithmetic
//!
//! Pure rules behind every stock movement.
//!
//! ## Conservation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  product.current_stock == Σ in.quantity − Σ out.quantity               │
//! │                                                                         │
//! │  seq  dir  qty  prev  new                                              │
//! │   1   in    10     0   10   initial stock                              │
//! │   2   in    20    10   30   restock                                    │
//! │   3   out   25    30    5   sale SAL-20260131-4KQ9ZP                   │
//! │                                                                         │
//! │  Every row satisfies new = prev ± qty, and the rows chain:             │
//! │  row[n].prev == row[n-1].new                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{LedgerError, LedgerResult};
use crate::types::{MovementDirection, Product, StockMovement};

/// Computes the stock after applying a movement.
///
/// ## Errors
/// `InsufficientStock` when an `Out` movement would take stock below zero.
///
/// ## Example
/// ```rust
/// use ledger_core::stock::next_stock;
/// use ledger_core::MovementDirection;
///
/// assert_eq!(next_stock("p", MovementDirection::In, 10, 20).unwrap(), 30);
/// assert_eq!(next_stock("p", MovementDirection::Out, 30, 25).unwrap(), 5);
/// assert!(next_stock("p", MovementDirection::Out, 4, 6).is_err());
/// ```
pub fn next_stock(
    product_id: &str,
    direction: MovementDirection,
    current: i64,
    quantity: i64,
) -> LedgerResult<i64> {
    match direction {
        MovementDirection::In => Ok(current + quantity),
        MovementDirection::Out if quantity > current => Err(LedgerError::InsufficientStock {
            product_id: product_id.to_string(),
            available: current,
            requested: quantity,
        }),
        MovementDirection::Out => Ok(current - quantity),
    }
}

/// True when some stock is left but no more than the minimum threshold.
/// An empty product counts as out of stock, not low.
pub fn is_low_stock(product: &Product) -> bool {
    product.current_stock > 0 && product.current_stock <= product.min_stock
}

/// True when nothing is left.
pub fn is_out_of_stock(product: &Product) -> bool {
    product.current_stock == 0
}

/// Signed sum of a movement history.
pub fn signed_sum<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements
        .into_iter()
        .map(|m| m.direction.signed(m.quantity))
        .sum()
}

/// Checks a single movement's arithmetic.
pub fn is_consistent(movement: &StockMovement) -> bool {
    movement.quantity > 0
        && movement.new_stock >= 0
        && movement.previous_stock + movement.direction.signed(movement.quantity)
            == movement.new_stock
}

/// Movement needed to bring `current` to a physically counted quantity.
///
/// Returns `None` when the count matches.
pub fn count_delta(current: i64, counted: i64) -> Option<(MovementDirection, i64)> {
    match counted - current {
        0 => None,
        d if d > 0 => Some((MovementDirection::In, d)),
        d => Some((MovementDirection::Out, -d)),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
