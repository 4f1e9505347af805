//! # Stock Ledger
//!
//! Every change to a product's stock goes through here and leaves an
//! immutable [`StockMovement`] behind.
//!
//! ## One Stock Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  remove_stock(p-1, 6, "sale")                   (inside caller's tx)    │
//! │                                                                         │
//! │  1. validate quantity / reason / actor           → Validation          │
//! │  2. SELECT product                               → NotFound            │
//! │  3. next_stock(10, out 6) = 4                    → InsufficientStock   │
//! │  4. UPDATE products ... WHERE version = 7        → ConcurrencyConflict │
//! │  5. INSERT stock_movements (10 → 4)                                    │
//! │                                                                         │
//! │  Any error: caller's tx rolls back, nothing from 4/5 survives          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations take the open transaction as `&mut DbTx`; committing is the
//! caller's job (normally [`crate::LedgerEngine`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use ledger_core::stock::next_stock;
use ledger_core::validation::{
    validate_actor_id, validate_amount_cents, validate_counted, validate_min_stock,
    validate_product_name, validate_quantity, validate_reason, validate_sku,
};
use ledger_core::{
    Clock, LedgerResult, MovementCursor, MovementDirection, MovementFilter, NewProduct, Page,
    Product, StockMovement, ValidationError, INITIAL_STOCK_REASON,
};
use ledger_db::{DbTx, MovementRepository, ProductRepository};

/// Largest page `movements_page` will return.
pub const MAX_PAGE_SIZE: u32 = 500;

/// A requested stock change. The direction is chosen by the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: String,
    pub quantity: i64,
    pub reason: String,
    /// Document number that justifies the change, if any.
    pub reference: Option<String>,
    pub actor_id: String,
}

impl StockChange {
    pub fn new(
        product_id: impl Into<String>,
        quantity: i64,
        reason: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        StockChange {
            product_id: product_id.into(),
            quantity,
            reason: reason.into(),
            reference: None,
            actor_id: actor_id.into(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Result of reconciling a product against its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAudit {
    pub product_id: String,
    pub current_stock: i64,
    /// Signed sum of every movement for the product.
    pub ledger_sum: i64,
    /// Movements whose `previous_stock` differs from the prior `new_stock`.
    pub broken_links: i64,
}

impl StockAudit {
    pub fn is_consistent(&self) -> bool {
        self.current_stock == self.ledger_sum && self.broken_links == 0
    }
}

/// Stock ledger operations.
#[derive(Clone)]
pub struct StockLedger {
    clock: Arc<dyn Clock>,
    products: ProductRepository,
    movements: MovementRepository,
}

impl StockLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        StockLedger {
            clock,
            products: ProductRepository,
            movements: MovementRepository,
        }
    }

    /// Books an `in` movement and raises the product's stock.
    pub async fn add_stock(&self, tx: &mut DbTx, change: &StockChange) -> LedgerResult<StockMovement> {
        self.apply(tx, MovementDirection::In, change).await
    }

    /// Books an `out` movement and lowers the product's stock.
    ///
    /// ## Errors
    /// `InsufficientStock` when `quantity` exceeds current stock.
    pub async fn remove_stock(&self, tx: &mut DbTx, change: &StockChange) -> LedgerResult<StockMovement> {
        self.apply(tx, MovementDirection::Out, change).await
    }

    /// Shared write path for both directions.
    pub async fn apply(
        &self,
        tx: &mut DbTx,
        direction: MovementDirection,
        change: &StockChange,
    ) -> LedgerResult<StockMovement> {
        validate_quantity(change.quantity)?;
        validate_reason(&change.reason)?;
        validate_actor_id(&change.actor_id)?;

        let product = self.products.require(tx, &change.product_id).await?;
        ensure_active(&product)?;

        let new_stock = next_stock(&product.id, direction, product.current_stock, change.quantity)?;
        let now = self.clock.now();

        self.products
            .update_stock(tx, &product.id, new_stock, product.version, now)
            .await?;

        let mut movement = StockMovement {
            seq: 0,
            id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            direction,
            quantity: change.quantity,
            previous_stock: product.current_stock,
            new_stock,
            reason: change.reason.trim().to_string(),
            reference: change.reference.clone(),
            actor_id: change.actor_id.clone(),
            created_at: now,
        };
        movement.seq = self.movements.append(tx, &movement).await?;

        debug!(
            product_id = %movement.product_id,
            direction = %direction,
            quantity = movement.quantity,
            previous = movement.previous_stock,
            new = movement.new_stock,
            "Stock movement booked"
        );

        Ok(movement)
    }

    /// One page of a product's movements, newest first.
    ///
    /// Pass the returned `next` cursor back to continue. A cursor stays valid
    /// across later writes: new movements never shift older pages.
    pub async fn movements_page(
        &self,
        tx: &mut DbTx,
        product_id: &str,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: u32,
    ) -> LedgerResult<Page<StockMovement, MovementCursor>> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "page size".to_string(),
                min: 1,
                max: MAX_PAGE_SIZE as i64,
            }
            .into());
        }

        // Existence check so an unknown product is NotFound, not an empty page.
        self.products.require(tx, product_id).await?;

        let mut items = self
            .movements
            .page_for_product(tx, product_id, filter, after, limit + 1)
            .await?;

        let next = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items.last().map(|m| MovementCursor(m.seq))
        } else {
            None
        };

        Ok(Page { items, next })
    }

    /// Creates a product at zero stock, then books `initial_stock` as an
    /// `in` movement so the ledger accounts for it.
    pub async fn register_product(
        &self,
        tx: &mut DbTx,
        input: &NewProduct,
        initial_stock: i64,
        actor_id: &str,
    ) -> LedgerResult<Product> {
        validate_sku(&input.sku)?;
        validate_product_name(&input.name)?;
        validate_min_stock(input.min_stock)?;
        validate_amount_cents("cost", input.cost_cents)?;
        validate_amount_cents("price", input.price_cents)?;
        validate_counted(initial_stock)?;
        validate_actor_id(actor_id)?;

        let now = self.clock.now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            current_stock: 0,
            min_stock: input.min_stock,
            cost_cents: input.cost_cents,
            price_cents: input.price_cents,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.products.insert(tx, &product).await?;

        if initial_stock > 0 {
            let change = StockChange::new(&product.id, initial_stock, INITIAL_STOCK_REASON, actor_id);
            self.add_stock(tx, &change).await?;
        }

        let product = self.products.require(tx, &product.id).await?;
        info!(id = %product.id, sku = %product.sku, stock = product.current_stock, "Product registered");
        Ok(product)
    }

    /// Soft-retires a product. Its history stays; new movements are refused.
    pub async fn retire_product(&self, tx: &mut DbTx, product_id: &str) -> LedgerResult<Product> {
        let product = self.products.require(tx, product_id).await?;
        if !product.is_active {
            return Ok(product);
        }

        self.products
            .set_active(tx, product_id, false, product.version, self.clock.now())
            .await?;

        info!(id = %product_id, "Product retired");
        Ok(self.products.require(tx, product_id).await?)
    }

    /// Recomputes the product's stock from its movements.
    pub async fn verify_product(&self, tx: &mut DbTx, product_id: &str) -> LedgerResult<StockAudit> {
        let product = self.products.require(tx, product_id).await?;
        let ledger_sum = self.movements.signed_sum(tx, product_id).await?;
        let broken_links = self.movements.broken_chain_count(tx, product_id).await?;

        Ok(StockAudit {
            product_id: product.id,
            current_stock: product.current_stock,
            ledger_sum,
            broken_links,
        })
    }
}

/// Retired products take no new movements.
pub(crate) fn ensure_active(product: &Product) -> Result<(), ValidationError> {
    if product.is_active {
        Ok(())
    } else {
        Err(ValidationError::Inactive {
            entity: "Product".to_string(),
            id: product.id.clone(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
