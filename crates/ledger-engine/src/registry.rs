//! # Deposit Type Registry
//!
//! Catalogue of returnable packaging and the circulating quantity of each
//! type.
//!
//! Packaging on hand is not stored. It is aggregated from the deposits table
//! every time it is needed:
//!
//! ```text
//! in_stock(type) = Σ quantity          of incoming deposits, status active
//!                − Σ quantity_pending  of outgoing deposits, status active|partial
//!
//! reported as max(0, in_stock)
//! ```
//!
//! Issuing writes (outgoing deposits) call [`DepositTypeRegistry::claim`],
//! which re-checks the aggregate and bumps the type's version inside the
//! issuing transaction, so two issuers of the same type cannot both pass
//! their check.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use ledger_core::validation::{validate_amount_cents, validate_deposit_type_name};
use ledger_core::{
    Clock, DepositType, DepositTypeUpdate, LedgerError, LedgerResult, NewDepositType,
    ValidationError,
};
use ledger_db::{DbTx, DepositTypeRepository};

#[derive(Clone)]
pub struct DepositTypeRegistry {
    clock: Arc<dyn Clock>,
    types: DepositTypeRepository,
}

impl DepositTypeRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        DepositTypeRegistry {
            clock,
            types: DepositTypeRepository,
        }
    }

    /// Registers a new, active deposit type.
    ///
    /// ## Errors
    /// `Validation(Duplicate)` if the name is taken.
    pub async fn create(&self, tx: &mut DbTx, input: &NewDepositType) -> LedgerResult<DepositType> {
        validate_deposit_type_name(&input.name)?;
        validate_amount_cents("deposit amount", input.amount_cents)?;

        let now = self.clock.now();
        let deposit_type = DepositType {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            amount_cents: input.amount_cents,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.types.insert(tx, &deposit_type).await?;

        info!(id = %deposit_type.id, name = %deposit_type.name, "Deposit type created");
        Ok(deposit_type)
    }

    pub async fn get(&self, tx: &mut DbTx, id: &str) -> LedgerResult<DepositType> {
        Ok(self.types.require(tx, id).await?)
    }

    /// Types ordered by name. Inactive ones only when asked for.
    pub async fn list(&self, tx: &mut DbTx, include_inactive: bool) -> LedgerResult<Vec<DepositType>> {
        Ok(self.types.list(tx, include_inactive).await?)
    }

    /// Applies a partial update. Existing deposits keep the unit amount they
    /// were opened with.
    pub async fn update(&self, tx: &mut DbTx, id: &str, changes: &DepositTypeUpdate) -> LedgerResult<DepositType> {
        let current = self.types.require(tx, id).await?;
        let mut next = current.clone();

        if let Some(name) = &changes.name {
            validate_deposit_type_name(name)?;
            next.name = name.trim().to_string();
        }
        if let Some(amount_cents) = changes.amount_cents {
            validate_amount_cents("deposit amount", amount_cents)?;
            next.amount_cents = amount_cents;
        }
        if let Some(is_active) = changes.is_active {
            next.is_active = is_active;
        }

        if next == current {
            return Ok(current);
        }

        next.updated_at = self.clock.now();
        self.types.update(tx, &next, current.version).await?;
        next.version = current.version + 1;

        info!(id = %next.id, name = %next.name, active = next.is_active, "Deposit type updated");
        Ok(next)
    }

    /// Hard-deletes a type that no deposit has ever referenced.
    ///
    /// ## Errors
    /// `Validation(InUse)` when deposits exist; deactivate it instead.
    pub async fn delete(&self, tx: &mut DbTx, id: &str) -> LedgerResult<()> {
        self.types.require(tx, id).await?;

        let references = self.types.reference_count(tx, id).await?;
        if references > 0 {
            return Err(ValidationError::InUse {
                entity: "DepositType".to_string(),
                id: id.to_string(),
                references,
            }
            .into());
        }

        self.types.delete(tx, id).await?;
        info!(id = %id, "Deposit type deleted");
        Ok(())
    }

    /// Packaging of this type on hand, never negative.
    pub async fn quantity_in_stock(&self, tx: &mut DbTx, id: &str) -> LedgerResult<i64> {
        self.types.require(tx, id).await?;
        let raw = self.types.raw_quantity_in_stock(tx, id).await?;
        Ok(raw.max(0))
    }

    pub async fn has_enough_stock(&self, tx: &mut DbTx, id: &str, required: i64) -> LedgerResult<bool> {
        Ok(self.quantity_in_stock(tx, id).await? >= required)
    }

    /// Checks that `quantity` units can be issued and claims the type for
    /// this transaction.
    ///
    /// ## Errors
    /// - `InsufficientDepositStock` when not enough packaging is on hand
    /// - `ConcurrencyConflict` when another issuer claimed it first
    pub async fn claim(&self, tx: &mut DbTx, deposit_type: &DepositType, quantity: i64) -> LedgerResult<()> {
        let available = self
            .types
            .raw_quantity_in_stock(tx, &deposit_type.id)
            .await?
            .max(0);

        if quantity > available {
            return Err(LedgerError::InsufficientDepositStock {
                deposit_type_id: deposit_type.id.clone(),
                available,
                requested: quantity,
            });
        }

        self.types
            .bump_version(tx, &deposit_type.id, deposit_type.version, self.clock.now())
            .await?;

        debug!(id = %deposit_type.id, quantity, available, "Deposit type claimed for issue");
        Ok(())
    }
}

/// Inactive types cannot be used for new deposits.
pub(crate) fn ensure_active(deposit_type: &DepositType) -> Result<(), ValidationError> {
    if deposit_type.is_active {
        Ok(())
    } else {
        Err(ValidationError::Inactive {
            entity: "DepositType".to_string(),
            id: deposit_type.id.clone(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
