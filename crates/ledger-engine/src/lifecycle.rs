//! # Deposit Lifecycle
//!
//! Opens deposits, books returns against them and cancels them. The state
//! rules live in [`ledger_core::deposit`]; this module loads the deposit,
//! applies the pure transition, and writes the result back under the
//! version it read.
//!
//! ```text
//! record_return(d-1, 4)
//!   ├─ SELECT deposit               qty 10, pending 10, version 0
//!   ├─ deposit::apply_return        pending 6, returned 4, partial
//!   ├─ UPDATE ... WHERE version = 0 (else ConcurrencyConflict)
//!   └─ INSERT deposit_returns       refund 4 × 500 = 2000
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use ledger_core::deposit::{self, ReturnOutcome};
use ledger_core::reference::{deposit_reference, random_suffix};
use ledger_core::{
    Clock, Deposit, DepositDirection, DepositFilter, DepositReturn, LedgerError, LedgerResult,
    NewDeposit, ValidationError,
};
use ledger_db::{DbTx, DepositRepository, DepositReturnRepository, PartyRepository};

use crate::registry::{ensure_active, DepositTypeRegistry};

/// Longest accepted free-text note on a deposit or return.
pub const MAX_NOTES_LEN: usize = 1_000;

/// A booked return: the updated deposit and the return record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReceipt {
    pub deposit: Deposit,
    pub record: DepositReturn,
}

#[derive(Clone)]
pub struct DepositLifecycle {
    clock: Arc<dyn Clock>,
    registry: DepositTypeRegistry,
    deposits: DepositRepository,
    returns: DepositReturnRepository,
    parties: PartyRepository,
    reference_attempts: u32,
}

impl DepositLifecycle {
    pub fn new(clock: Arc<dyn Clock>, registry: DepositTypeRegistry, reference_attempts: u32) -> Self {
        DepositLifecycle {
            clock,
            registry,
            deposits: DepositRepository,
            returns: DepositReturnRepository,
            parties: PartyRepository,
            reference_attempts,
        }
    }

    /// Opens a deposit.
    ///
    /// ## Errors
    /// - `Validation` for bad quantities, a direction/counterparty mismatch,
    ///   or an inactive deposit type
    /// - `NotFound` for an unknown type or counterparty
    /// - `InsufficientDepositStock` when an outgoing deposit needs more
    ///   packaging than is on hand
    pub async fn create_deposit(&self, tx: &mut DbTx, input: NewDeposit) -> LedgerResult<Deposit> {
        deposit::validate_new(&input)?;
        validate_notes(input.notes.as_deref())?;

        let deposit_type = self.registry.get(tx, &input.deposit_type_id).await?;
        ensure_active(&deposit_type)?;

        let counterparty = &input.counterparty;
        self.parties
            .require(tx, counterparty.kind(), counterparty.id())
            .await?;

        if input.direction == DepositDirection::Outgoing {
            self.registry.claim(tx, &deposit_type, input.quantity).await?;
        }

        let reference = self.next_reference(tx, input.direction).await?;
        let opened = deposit::open(input, Uuid::new_v4().to_string(), reference, self.clock.now());
        self.deposits.insert(tx, &opened).await?;

        info!(
            id = %opened.id,
            reference = %opened.reference,
            direction = %opened.direction,
            quantity = opened.quantity,
            "Deposit opened"
        );

        Ok(opened)
    }

    /// Books a partial or full return.
    ///
    /// ## Errors
    /// - `Validation` if `quantity <= 0`
    /// - `InvalidTransition` if the deposit is cancelled
    /// - `OverReturn` if `quantity` exceeds what is pending
    pub async fn record_return(
        &self,
        tx: &mut DbTx,
        deposit_id: &str,
        quantity: i64,
        notes: Option<String>,
    ) -> LedgerResult<ReturnReceipt> {
        validate_notes(notes.as_deref())?;

        let current = self.deposits.require(tx, deposit_id).await?;
        let now = self.clock.now();
        let ReturnOutcome {
            deposit: mut updated,
            quantity,
            refund,
        } = deposit::apply_return(&current, quantity, now)?;

        self.deposits
            .update_progress(tx, &updated, current.version)
            .await?;
        updated.version = current.version + 1;

        let record = DepositReturn {
            id: Uuid::new_v4().to_string(),
            deposit_id: updated.id.clone(),
            quantity,
            refund_cents: refund.cents(),
            notes,
            returned_at: now,
        };
        self.returns.append(tx, &record).await?;

        info!(
            deposit = %updated.reference,
            quantity,
            refund_cents = record.refund_cents,
            status = %updated.status,
            "Deposit return recorded"
        );

        Ok(ReturnReceipt {
            deposit: updated,
            record,
        })
    }

    /// Cancels an active or partial deposit.
    pub async fn cancel(&self, tx: &mut DbTx, deposit_id: &str) -> LedgerResult<Deposit> {
        let current = self.deposits.require(tx, deposit_id).await?;
        let mut cancelled = deposit::cancel(&current, self.clock.now())?;

        self.deposits
            .update_progress(tx, &cancelled, current.version)
            .await?;
        cancelled.version = current.version + 1;

        info!(id = %cancelled.id, reference = %cancelled.reference, "Deposit cancelled");
        Ok(cancelled)
    }

    pub async fn get(&self, tx: &mut DbTx, deposit_id: &str) -> LedgerResult<Deposit> {
        Ok(self.deposits.require(tx, deposit_id).await?)
    }

    pub async fn get_by_reference(&self, tx: &mut DbTx, reference: &str) -> LedgerResult<Deposit> {
        self.deposits
            .get_by_reference(tx, reference)
            .await?
            .ok_or_else(|| LedgerError::not_found("Deposit", reference))
    }

    /// Deposits matching every set filter, newest first.
    pub async fn list(&self, tx: &mut DbTx, filter: &DepositFilter) -> LedgerResult<Vec<Deposit>> {
        Ok(self.deposits.list(tx, filter).await?)
    }

    /// Return history of one deposit, oldest first.
    pub async fn returns_for(&self, tx: &mut DbTx, deposit_id: &str) -> LedgerResult<Vec<DepositReturn>> {
        self.deposits.require(tx, deposit_id).await?;
        Ok(self.returns.for_deposit(tx, deposit_id).await?)
    }

    /// Draws random references until one is free.
    async fn next_reference(&self, tx: &mut DbTx, direction: DepositDirection) -> LedgerResult<String> {
        let today = self.clock.today();

        for attempt in 1..=self.reference_attempts {
            let candidate = deposit_reference(direction, today, &random_suffix());
            if !self.deposits.reference_exists(tx, &candidate).await? {
                return Ok(candidate);
            }
            debug!(reference = %candidate, attempt, "Deposit reference collision");
        }

        Err(LedgerError::Persistence(format!(
            "no free deposit reference after {} attempts",
            self.reference_attempts
        )))
    }
}

fn validate_notes(notes: Option<&str>) -> Result<(), ValidationError> {
    match notes {
        Some(text) if text.chars().count() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestLedger;
    use ledger_core::deposit::is_conserved;
    use ledger_core::{Counterparty, DepositStatus, ErrorKind};

    fn outgoing(type_id: &str, customer: &str, quantity: i64) -> NewDeposit {
        NewDeposit {
            direction: DepositDirection::Outgoing,
            deposit_type_id: type_id.to_string(),
            counterparty: Counterparty::Customer(customer.to_string()),
            quantity,
            unit_amount_cents: 500,
            source_reference: None,
            notes: None,
        }
    }

    fn incoming(type_id: &str, supplier: &str, quantity: i64) -> NewDeposit {
        NewDeposit {
            direction: DepositDirection::Incoming,
            deposit_type_id: type_id.to_string(),
            counterparty: Counterparty::Supplier(supplier.to_string()),
            quantity,
            unit_amount_cents: 500,
            source_reference: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_partial_then_full_return() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Crate").await;
        let supplier = t.supplier(&mut tx, "Brouwerij Noord").await;
        let customer = t.customer(&mut tx, "Cafe De Hoek").await;

        t.lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 10))
            .await
            .unwrap();
        let opened = t
            .lifecycle
            .create_deposit(&mut tx, outgoing(&type_id, &customer, 10))
            .await
            .unwrap();
        assert!(opened.reference.starts_with("DOUT-20260131-"));
        assert_eq!(opened.status, DepositStatus::Active);

        let first = t
            .lifecycle
            .record_return(&mut tx, &opened.id, 4, Some("first load".into()))
            .await
            .unwrap();
        assert_eq!(first.deposit.quantity_pending, 6);
        assert_eq!(first.deposit.quantity_returned, 4);
        assert_eq!(first.deposit.status, DepositStatus::Partial);
        assert_eq!(first.record.refund_cents, 2000);

        let second = t
            .lifecycle
            .record_return(&mut tx, &opened.id, 6, None)
            .await
            .unwrap();
        assert_eq!(second.deposit.quantity_pending, 0);
        assert_eq!(second.deposit.quantity_returned, 10);
        assert_eq!(second.deposit.status, DepositStatus::Returned);
        assert_eq!(second.record.refund_cents, 3000);

        let stored = t.lifecycle.get(&mut tx, &opened.id).await.unwrap();
        assert_eq!(stored.version, second.deposit.version);
        assert!(is_conserved(&stored));

        let history = t.lifecycle.returns_for(&mut tx, &opened.id).await.unwrap();
        let quantities: Vec<i64> = history.iter().map(|r| r.quantity).collect();
        assert_eq!(quantities, vec![4, 6]);
    }

    #[tokio::test]
    async fn test_over_return_changes_nothing() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Keg").await;
        let supplier = t.supplier(&mut tx, "Frisdrank Groothandel").await;

        let opened = t
            .lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 3))
            .await
            .unwrap();

        let err = t
            .lifecycle
            .record_return(&mut tx, &opened.id, 4, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::OverReturn { pending: 3, requested: 4, .. }
        ));

        let stored = t.lifecycle.get(&mut tx, &opened.id).await.unwrap();
        assert_eq!(stored.quantity_pending, 3);
        assert_eq!(stored.version, opened.version);
        assert!(t.lifecycle.returns_for(&mut tx, &opened.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Bottle").await;
        let supplier = t.supplier(&mut tx, "Brouwerij Noord").await;

        let open = t
            .lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 5))
            .await
            .unwrap();
        let cancelled = t.lifecycle.cancel(&mut tx, &open.id).await.unwrap();
        assert_eq!(cancelled.status, DepositStatus::Cancelled);

        let again = t.lifecycle.cancel(&mut tx, &open.id).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::InvalidTransition);

        let on_cancelled = t
            .lifecycle
            .record_return(&mut tx, &open.id, 1, None)
            .await
            .unwrap_err();
        assert_eq!(on_cancelled.kind(), ErrorKind::InvalidTransition);

        let done = t
            .lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 2))
            .await
            .unwrap();
        t.lifecycle.record_return(&mut tx, &done.id, 2, None).await.unwrap();
        let err = t.lifecycle.cancel(&mut tx, &done.id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { status: DepositStatus::Returned, .. }
        ));
    }

    #[tokio::test]
    async fn test_type_stock_nets_incoming_against_outgoing() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Crate").await;
        let supplier = t.supplier(&mut tx, "Brouwerij Noord").await;
        let customer = t.customer(&mut tx, "Bar Centraal").await;

        t.lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 50))
            .await
            .unwrap();
        t.lifecycle
            .create_deposit(&mut tx, outgoing(&type_id, &customer, 20))
            .await
            .unwrap();

        assert_eq!(t.registry.quantity_in_stock(&mut tx, &type_id).await.unwrap(), 30);

        let err = t
            .lifecycle
            .create_deposit(&mut tx, outgoing(&type_id, &customer, 31))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientDepositStock { available: 30, requested: 31, .. }
        ));
    }

    #[tokio::test]
    async fn test_rejects_mismatch_inactive_and_unknown() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Crate").await;
        let customer = t.customer(&mut tx, "Hotel Zuid").await;

        let mut mismatched = incoming(&type_id, &customer, 1);
        mismatched.counterparty = Counterparty::Customer(customer.clone());
        let err = t.lifecycle.create_deposit(&mut tx, mismatched).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::Inconsistent { .. })
        ));

        let unknown_party = t
            .lifecycle
            .create_deposit(&mut tx, incoming(&type_id, "no-such-supplier", 1))
            .await
            .unwrap_err();
        assert_eq!(unknown_party.kind(), ErrorKind::NotFound);

        let unknown_type = t
            .lifecycle
            .create_deposit(&mut tx, outgoing("no-such-type", &customer, 1))
            .await
            .unwrap_err();
        assert_eq!(unknown_type.kind(), ErrorKind::NotFound);

        t.registry
            .update(
                &mut tx,
                &type_id,
                &ledger_core::DepositTypeUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let inactive = t
            .lifecycle
            .create_deposit(&mut tx, outgoing(&type_id, &customer, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            inactive,
            LedgerError::Validation(ValidationError::Inactive { .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_reference_and_filters() {
        let t = TestLedger::new().await;
        let mut tx = t.db.begin().await.unwrap();
        let type_id = t.deposit_type(&mut tx, "Crate").await;
        let supplier = t.supplier(&mut tx, "Brouwerij Noord").await;
        let customer = t.customer(&mut tx, "Sportkantine").await;

        let received = t
            .lifecycle
            .create_deposit(&mut tx, incoming(&type_id, &supplier, 8))
            .await
            .unwrap();
        let issued = t
            .lifecycle
            .create_deposit(&mut tx, outgoing(&type_id, &customer, 2))
            .await
            .unwrap();
        assert!(received.reference.starts_with("DIN-"));

        let found = t
            .lifecycle
            .get_by_reference(&mut tx, &issued.reference)
            .await
            .unwrap();
        assert_eq!(found.id, issued.id);

        let missing = t
            .lifecycle
            .get_by_reference(&mut tx, "DOUT-19990101-XXXXXX")
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let outgoing_only = t
            .lifecycle
            .list(
                &mut tx,
                &DepositFilter {
                    direction: Some(DepositDirection::Outgoing),
                    ..DepositFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outgoing_only.len(), 1);
        assert_eq!(outgoing_only[0].id, issued.id);

        let by_supplier = t
            .lifecycle
            .list(
                &mut tx,
                &DepositFilter {
                    counterparty: Some(Counterparty::Supplier(supplier.clone())),
                    ..DepositFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_supplier.len(), 1);
        assert_eq!(by_supplier[0].id, received.id);
    }
}
