//! # Deposit State Machine
//!
//! Pure transitions over an explicit [`Deposit`] value. The engine loads a
//! deposit, calls one of these functions, and persists the result; nothing
//! here touches storage.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Deposit Lifecycle                                 │
//! │                                                                         │
//! │  open()            qty=10  pending=10 returned=0   ACTIVE              │
//! │     │                                                                   │
//! │     ▼ apply_return(4)                                                   │
//! │                    qty=10  pending=6  returned=4   PARTIAL             │
//! │     │                                                                   │
//! │     ▼ apply_return(6)                                                   │
//! │                    qty=10  pending=0  returned=10  RETURNED (terminal) │
//! │                                                                         │
//! │  cancel() from ACTIVE or PARTIAL ──► CANCELLED (terminal)              │
//! │                                                                         │
//! │  Always: pending + returned == qty, returned never decreases           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::money::Money;
use crate::types::{Deposit, DepositDirection, DepositStatus, NewDeposit};
use crate::validation::{validate_amount_cents, validate_quantity};

/// Result of applying a return to a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOutcome {
    /// The deposit after the return.
    pub deposit: Deposit,
    /// Quantity returned in this event.
    pub quantity: i64,
    /// `quantity × unit amount`.
    pub refund: Money,
}

/// Validates deposit input: positive quantity, non-negative amount, and a
/// counterparty that matches the direction.
pub fn validate_new(input: &NewDeposit) -> Result<(), ValidationError> {
    validate_quantity(input.quantity)?;
    validate_amount_cents("unit amount", input.unit_amount_cents)?;

    if input.deposit_type_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "deposit type".to_string(),
        });
    }

    if input.counterparty.id().trim().is_empty() {
        return Err(ValidationError::Required {
            field: "counterparty".to_string(),
        });
    }

    let expected = input.direction.counterparty_kind();
    if input.counterparty.kind() != expected {
        return Err(ValidationError::Inconsistent {
            field: "counterparty".to_string(),
            reason: format!(
                "{} deposits must name a {}, got a {}",
                input.direction,
                expected,
                input.counterparty.kind()
            ),
        });
    }

    Ok(())
}

/// Builds a freshly opened deposit. The caller supplies the generated id and
/// reference.
pub fn open(input: NewDeposit, id: String, reference: String, now: DateTime<Utc>) -> Deposit {
    Deposit {
        id,
        reference,
        direction: input.direction,
        deposit_type_id: input.deposit_type_id,
        counterparty: input.counterparty,
        quantity: input.quantity,
        quantity_pending: input.quantity,
        quantity_returned: 0,
        unit_amount_cents: input.unit_amount_cents,
        status: DepositStatus::Active,
        source_reference: input.source_reference,
        notes: input.notes,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Quantity still out.
#[inline]
pub fn remaining(deposit: &Deposit) -> i64 {
    deposit.quantity_pending
}

/// True once every unit has come back.
#[inline]
pub fn is_fully_returned(deposit: &Deposit) -> bool {
    deposit.quantity_pending == 0 && deposit.quantity_returned == deposit.quantity
}

/// Outstanding liability (or receivable, for incoming deposits).
pub fn outstanding_amount(deposit: &Deposit) -> Money {
    if deposit.status.is_open() {
        deposit.unit_amount().multiply_quantity(deposit.quantity_pending)
    } else {
        Money::zero()
    }
}

/// Conservation check: `pending + returned == quantity`, nothing negative.
pub fn is_conserved(deposit: &Deposit) -> bool {
    deposit.quantity_pending >= 0
        && deposit.quantity_returned >= 0
        && deposit.quantity_pending + deposit.quantity_returned == deposit.quantity
}

/// Status implied by the pending/returned split of an uncancelled deposit.
pub fn status_for(quantity_pending: i64, quantity_returned: i64) -> DepositStatus {
    if quantity_pending == 0 {
        DepositStatus::Returned
    } else if quantity_returned > 0 {
        DepositStatus::Partial
    } else {
        DepositStatus::Active
    }
}

/// Applies a (partial or full) return.
///
/// ## Errors
/// - `Validation` if `quantity <= 0`
/// - `InvalidTransition` if the deposit is cancelled
/// - `OverReturn` if `quantity > quantity_pending` (covers returned deposits,
///   whose pending is zero)
///
/// On error the input deposit is untouched (it is borrowed immutably).
///
/// ## Example
/// ```rust
/// # use chrono::Utc;
/// # use ledger_core::deposit::{apply_return, open};
/// # use ledger_core::{Counterparty, DepositDirection, DepositStatus, NewDeposit};
/// let d = open(
///     NewDeposit {
///         direction: DepositDirection::Outgoing,
///         deposit_type_id: "crate".into(),
///         counterparty: Counterparty::Customer("c-1".into()),
///         quantity: 10,
///         unit_amount_cents: 500,
///         source_reference: None,
///         notes: None,
///     },
///     "d-1".into(),
///     "DOUT-20260131-AAAAAA".into(),
///     Utc::now(),
/// );
/// let out = apply_return(&d, 4, Utc::now()).unwrap();
/// assert_eq!(out.deposit.status, DepositStatus::Partial);
/// assert_eq!(out.refund.cents(), 2000);
/// ```
pub fn apply_return(deposit: &Deposit, quantity: i64, now: DateTime<Utc>) -> LedgerResult<ReturnOutcome> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "return quantity".to_string(),
        }
        .into());
    }

    if deposit.status == DepositStatus::Cancelled {
        return Err(LedgerError::InvalidTransition {
            deposit_id: deposit.id.clone(),
            status: deposit.status,
            action: "record a return".to_string(),
        });
    }

    if quantity > deposit.quantity_pending {
        return Err(LedgerError::OverReturn {
            deposit_id: deposit.id.clone(),
            pending: deposit.quantity_pending,
            requested: quantity,
        });
    }

    let refund = deposit
        .unit_amount()
        .checked_multiply_quantity(quantity)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "refund".to_string(),
            min: 0,
            max: i64::MAX,
        })?;

    let mut next = deposit.clone();
    next.quantity_returned += quantity;
    next.quantity_pending -= quantity;
    next.status = status_for(next.quantity_pending, next.quantity_returned);
    next.updated_at = now;

    Ok(ReturnOutcome {
        refund,
        quantity,
        deposit: next,
    })
}

/// Cancels an open deposit.
///
/// ## Errors
/// `InvalidTransition` from `returned` or `cancelled`.
pub fn cancel(deposit: &Deposit, now: DateTime<Utc>) -> LedgerResult<Deposit> {
    if !deposit.status.is_open() {
        return Err(LedgerError::InvalidTransition {
            deposit_id: deposit.id.clone(),
            status: deposit.status,
            action: "cancel".to_string(),
        });
    }

    let mut next = deposit.clone();
    next.status = DepositStatus::Cancelled;
    next.updated_at = now;
    Ok(next)
}

/// Packaging of one type currently on hand:
/// `Σ incoming.quantity (active) − Σ outgoing.quantity_pending (active|partial)`.
///
/// Negative raw values are reported as zero.
pub fn quantity_in_stock<'a>(deposits: impl IntoIterator<Item = &'a Deposit>) -> i64 {
    let raw: i64 = deposits
        .into_iter()
        .map(|d| match (d.direction, d.status) {
            (DepositDirection::Incoming, DepositStatus::Active) => d.quantity,
            (DepositDirection::Outgoing, status) if status.is_open() => -d.quantity_pending,
            _ => 0,
        })
        .sum();
    raw.max(0)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Counterparty;

    fn new_deposit(direction: DepositDirection, counterparty: Counterparty, qty: i64) -> NewDeposit {
        NewDeposit {
            direction,
            deposit_type_id: "t-crate".into(),
            counterparty,
            quantity: qty,
            unit_amount_cents: 500,
            source_reference: None,
            notes: None,
        }
    }

    fn opened(direction: DepositDirection, qty: i64) -> Deposit {
        let cp = match direction {
            DepositDirection::Incoming => Counterparty::Supplier("s-1".into()),
            DepositDirection::Outgoing => Counterparty::Customer("c-1".into()),
        };
        open(
            new_deposit(direction, cp, qty),
            format!("d-{qty}"),
            "DOUT-20260131-ABCDEF".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_partial_then_full_return() {
        let d = opened(DepositDirection::Outgoing, 10);

        let first = apply_return(&d, 4, Utc::now()).unwrap();
        assert_eq!(first.deposit.quantity_pending, 6);
        assert_eq!(first.deposit.quantity_returned, 4);
        assert_eq!(first.deposit.status, DepositStatus::Partial);
        assert_eq!(first.refund.cents(), 2000);
        assert!(is_conserved(&first.deposit));

        let second = apply_return(&first.deposit, 6, Utc::now()).unwrap();
        assert_eq!(second.deposit.quantity_pending, 0);
        assert_eq!(second.deposit.quantity_returned, 10);
        assert_eq!(second.deposit.status, DepositStatus::Returned);
        assert!(is_fully_returned(&second.deposit));
        assert_eq!(remaining(&second.deposit), 0);
    }

    #[test]
    fn test_over_return_leaves_deposit_unchanged() {
        let d = opened(DepositDirection::Outgoing, 10);
        let before = d.clone();

        let err = apply_return(&d, 11, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::OverReturn {
                pending: 10,
                requested: 11,
                ..
            }
        ));
        assert_eq!(d, before);
    }

    #[test]
    fn test_oversized_unit_amount_is_rejected() {
        let mut input = new_deposit(
            DepositDirection::Incoming,
            Counterparty::Supplier("s-1".into()),
            10,
        );
        input.unit_amount_cents = i64::MAX / 2;
        assert!(matches!(
            validate_new(&input),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_refund_overflow_is_an_error_not_a_panic() {
        let mut d = opened(DepositDirection::Incoming, 10);
        d.unit_amount_cents = i64::MAX / 2;
        let before = d.clone();

        let err = apply_return(&d, 3, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::OutOfRange { .. })
        ));
        assert_eq!(d, before);
    }

    #[test]
    fn test_return_on_fully_returned_deposit_is_over_return() {
        let d = opened(DepositDirection::Outgoing, 3);
        let done = apply_return(&d, 3, Utc::now()).unwrap().deposit;
        let err = apply_return(&done, 1, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::OverReturn { pending: 0, .. }));
    }

    #[test]
    fn test_cancel_rules() {
        let d = opened(DepositDirection::Outgoing, 10);
        let partial = apply_return(&d, 2, Utc::now()).unwrap().deposit;
        let cancelled = cancel(&partial, Utc::now()).unwrap();
        assert_eq!(cancelled.status, DepositStatus::Cancelled);
        assert!(is_conserved(&cancelled));

        let err = cancel(&cancelled, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        let err = apply_return(&cancelled, 1, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        let returned = apply_return(&d, 10, Utc::now()).unwrap().deposit;
        let err = cancel(&returned, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                status: DepositStatus::Returned,
                ..
            }
        ));
    }

    #[test]
    fn test_non_positive_return_is_validation_error() {
        let d = opened(DepositDirection::Outgoing, 10);
        assert!(matches!(
            apply_return(&d, 0, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_direction_and_counterparty_must_agree() {
        let bad = new_deposit(
            DepositDirection::Incoming,
            Counterparty::Customer("c-1".into()),
            5,
        );
        assert!(matches!(
            validate_new(&bad),
            Err(ValidationError::Inconsistent { .. })
        ));

        let good = new_deposit(
            DepositDirection::Incoming,
            Counterparty::Supplier("s-1".into()),
            5,
        );
        assert!(validate_new(&good).is_ok());
    }

    #[test]
    fn test_quantity_in_stock_formula() {
        let incoming = opened(DepositDirection::Incoming, 50);
        let outgoing = opened(DepositDirection::Outgoing, 20);
        assert_eq!(quantity_in_stock([&incoming, &outgoing]), 30);

        // a partial outgoing deposit only holds its pending quantity
        let partial = apply_return(&outgoing, 5, Utc::now()).unwrap().deposit;
        assert_eq!(quantity_in_stock([&incoming, &partial]), 35);

        // never negative
        assert_eq!(quantity_in_stock([&outgoing]), 0);
    }

    #[test]
    fn test_outstanding_amount() {
        let d = opened(DepositDirection::Outgoing, 10);
        assert_eq!(outstanding_amount(&d).cents(), 5000);
        let cancelled = cancel(&d, Utc::now()).unwrap();
        assert!(outstanding_amount(&cancelled).is_zero());
    }
}
