//! # Ledger Engine
//!
//! The facade callers use. Every public operation is one unit of work: open
//! a transaction, run the component operation, commit. A lost version race
//! rolls the unit back and runs it again from scratch.
//!
//! ## Unit of Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  engine.remove_stock(change)                                            │
//! │                                                                         │
//! │  attempt 1:  BEGIN → stock.remove_stock(&mut tx) → UPDATE ... version  │
//! │              rows_affected = 0 → ConcurrencyConflict → ROLLBACK         │
//! │                  │                                                      │
//! │                  ▼  sleep(backoff.next_backoff())   10ms, 20ms, 40ms…  │
//! │  attempt 2:  BEGIN → re-read product → check stock → write → COMMIT    │
//! │                                                                         │
//! │  Non-conflict errors return immediately.                               │
//! │  Conflicts after `retry.max_attempts` attempts are returned as-is.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ledger_core::{
    Clock, CounterpartyKind, Deposit, DepositFilter, DepositReturn, DepositType,
    DepositTypeUpdate, LedgerResult, MovementCursor, MovementFilter, NewDeposit, NewDepositType,
    NewProduct, Page, Party, Product, StockMovement, SystemClock,
};
use ledger_db::{Database, DbError, DbTx};

use crate::config::LedgerConfig;
use crate::coordinator::{
    AdjustmentRequest, DocumentReceipt, PurchaseRequest, SaleRequest, TransactionCoordinator,
};
use crate::lifecycle::{DepositLifecycle, ReturnReceipt};
use crate::registry::DepositTypeRegistry;
use crate::stock::{StockAudit, StockChange, StockLedger};
use crate::valuation::{SnapshotCache, Timeline, ValuationProjection, ValuationSnapshot};

/// Future returned by a unit-of-work closure. It may borrow the transaction
/// and nothing else.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = LedgerResult<T>> + Send + 't>>;

/// Entry point for every ledger operation.
pub struct LedgerEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    stock: StockLedger,
    registry: DepositTypeRegistry,
    lifecycle: DepositLifecycle,
    coordinator: TransactionCoordinator,
    valuation: ValuationProjection,
    cache: SnapshotCache,
}

impl LedgerEngine {
    /// Opens the configured database (running migrations) with the wall clock.
    pub async fn open(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        Ok(Self::new(db, Arc::new(SystemClock), config))
    }

    /// Builds an engine over an existing database and clock.
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let attempts = config.references.max_attempts;
        let stock = StockLedger::new(clock.clone());
        let registry = DepositTypeRegistry::new(clock.clone());
        let lifecycle = DepositLifecycle::new(clock.clone(), registry.clone(), attempts);
        let coordinator = TransactionCoordinator::new(
            clock.clone(),
            stock.clone(),
            registry.clone(),
            lifecycle.clone(),
            attempts,
        );
        let valuation = ValuationProjection::new(clock.clone());
        let cache = SnapshotCache::new(config.cache_ttl(), clock.clone());

        info!(
            max_attempts = config.retry.max_attempts,
            cache_ttl_secs = config.valuation.cache_ttl_secs,
            "Ledger engine ready"
        );

        LedgerEngine {
            db,
            clock,
            config,
            stock,
            registry,
            lifecycle,
            coordinator,
            valuation,
            cache,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn stock(&self) -> &StockLedger {
        &self.stock
    }

    pub fn registry(&self) -> &DepositTypeRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &DepositLifecycle {
        &self.lifecycle
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn valuation_projection(&self) -> &ValuationProjection {
        &self.valuation
    }

    // =========================================================================
    // Unit of Work
    // =========================================================================

    /// Runs `work` in a fresh transaction, retrying the whole unit on
    /// `ConcurrencyConflict`.
    ///
    /// Units composed here leave the valuation cache alone; follow them with
    /// [`refresh_valuation`](Self::refresh_valuation) when the dashboard must
    /// see the change at once.
    ///
    /// The closure is called once per attempt and must clone whatever it
    /// needs into the returned future:
    ///
    /// ```rust,ignore
    /// let stock = engine.stock().clone();
    /// engine.run("restock", |tx| {
    ///     let stock = stock.clone();
    ///     let change = change.clone();
    ///     Box::pin(async move { stock.add_stock(tx, &change).await })
    /// }).await?;
    /// ```
    pub async fn run<T, F>(&self, operation: &'static str, mut work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut DbTx) -> TxFuture<'t, T> + Send,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 1u32;

        loop {
            match self.attempt(&mut work).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.config.retry.max_backoff_ms));
                    warn!(operation, attempt, ?delay, error = %err, "Conflict, retrying unit of work");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(operation, attempts = attempt, error = %err, "Conflict persisted, giving up");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// [`run`](Self::run) for units that change stock, deposits or types.
    /// A committed change drops the cached valuation snapshot.
    async fn write<T, F>(&self, operation: &'static str, work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut DbTx) -> TxFuture<'t, T> + Send,
    {
        let value = self.run(operation, work).await?;
        self.cache.invalidate().await;
        Ok(value)
    }

    async fn attempt<T, F>(&self, work: &mut F) -> LedgerResult<T>
    where
        F: for<'t> FnMut(&'t mut DbTx) -> TxFuture<'t, T>,
    {
        let mut tx = self.db.begin().await?;
        let result = work(&mut tx).await;

        match result {
            Ok(value) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "Rollback failed; connection discards the transaction");
                }
                Err(err)
            }
        }
    }

    // =========================================================================
    // Products & Stock
    // =========================================================================

    pub async fn register_product(&self, input: NewProduct, initial_stock: i64, actor_id: &str) -> LedgerResult<Product> {
        self.write("register_product", |tx| {
            let stock = self.stock.clone();
            let input = input.clone();
            let actor_id = actor_id.to_string();
            Box::pin(async move { stock.register_product(tx, &input, initial_stock, &actor_id).await })
        })
        .await
    }

    pub async fn retire_product(&self, product_id: &str) -> LedgerResult<Product> {
        self.write("retire_product", |tx| {
            let stock = self.stock.clone();
            let product_id = product_id.to_string();
            Box::pin(async move { stock.retire_product(tx, &product_id).await })
        })
        .await
    }

    pub async fn verify_product(&self, product_id: &str) -> LedgerResult<StockAudit> {
        self.run("verify_product", |tx| {
            let stock = self.stock.clone();
            let product_id = product_id.to_string();
            Box::pin(async move { stock.verify_product(tx, &product_id).await })
        })
        .await
    }

    pub async fn add_stock(&self, change: StockChange) -> LedgerResult<StockMovement> {
        self.write("add_stock", |tx| {
            let stock = self.stock.clone();
            let change = change.clone();
            Box::pin(async move { stock.add_stock(tx, &change).await })
        })
        .await
    }

    pub async fn remove_stock(&self, change: StockChange) -> LedgerResult<StockMovement> {
        self.write("remove_stock", |tx| {
            let stock = self.stock.clone();
            let change = change.clone();
            Box::pin(async move { stock.remove_stock(tx, &change).await })
        })
        .await
    }

    pub async fn movements_page(
        &self,
        product_id: &str,
        filter: &MovementFilter,
        after: Option<MovementCursor>,
        limit: u32,
    ) -> LedgerResult<Page<StockMovement, MovementCursor>> {
        self.run("movements_page", |tx| {
            let stock = self.stock.clone();
            let product_id = product_id.to_string();
            let filter = filter.clone();
            Box::pin(async move { stock.movements_page(tx, &product_id, &filter, after, limit).await })
        })
        .await
    }

    /// Lazy newest-first walk over a product's movements.
    pub fn movements_for(&self, product_id: &str, filter: MovementFilter, page_size: u32) -> MovementHistory<'_> {
        MovementHistory {
            engine: self,
            product_id: product_id.to_string(),
            filter,
            page_size,
            cursor: None,
            exhausted: false,
        }
    }

    /// Continues a walk from a stored cursor.
    pub fn resume_movements(
        &self,
        product_id: &str,
        filter: MovementFilter,
        page_size: u32,
        cursor: MovementCursor,
    ) -> MovementHistory<'_> {
        MovementHistory {
            cursor: Some(cursor),
            ..self.movements_for(product_id, filter, page_size)
        }
    }

    // =========================================================================
    // Counterparties
    // =========================================================================

    pub async fn register_party(&self, kind: CounterpartyKind, name: &str) -> LedgerResult<Party> {
        self.run("register_party", |tx| {
            let coordinator = self.coordinator.clone();
            let name = name.to_string();
            Box::pin(async move { coordinator.register_party(tx, kind, &name).await })
        })
        .await
    }

    // =========================================================================
    // Deposit Types
    // =========================================================================

    pub async fn create_deposit_type(&self, input: NewDepositType) -> LedgerResult<DepositType> {
        self.write("create_deposit_type", |tx| {
            let registry = self.registry.clone();
            let input = input.clone();
            Box::pin(async move { registry.create(tx, &input).await })
        })
        .await
    }

    pub async fn deposit_type(&self, id: &str) -> LedgerResult<DepositType> {
        self.run("deposit_type", |tx| {
            let registry = self.registry.clone();
            let id = id.to_string();
            Box::pin(async move { registry.get(tx, &id).await })
        })
        .await
    }

    pub async fn deposit_types(&self, include_inactive: bool) -> LedgerResult<Vec<DepositType>> {
        self.run("deposit_types", |tx| {
            let registry = self.registry.clone();
            Box::pin(async move { registry.list(tx, include_inactive).await })
        })
        .await
    }

    pub async fn update_deposit_type(&self, id: &str, changes: DepositTypeUpdate) -> LedgerResult<DepositType> {
        self.write("update_deposit_type", |tx| {
            let registry = self.registry.clone();
            let id = id.to_string();
            let changes = changes.clone();
            Box::pin(async move { registry.update(tx, &id, &changes).await })
        })
        .await
    }

    pub async fn delete_deposit_type(&self, id: &str) -> LedgerResult<()> {
        self.write("delete_deposit_type", |tx| {
            let registry = self.registry.clone();
            let id = id.to_string();
            Box::pin(async move { registry.delete(tx, &id).await })
        })
        .await
    }

    pub async fn deposit_type_stock(&self, id: &str) -> LedgerResult<i64> {
        self.run("deposit_type_stock", |tx| {
            let registry = self.registry.clone();
            let id = id.to_string();
            Box::pin(async move { registry.quantity_in_stock(tx, &id).await })
        })
        .await
    }

    pub async fn has_enough_deposit_stock(&self, id: &str, required: i64) -> LedgerResult<bool> {
        self.run("has_enough_deposit_stock", |tx| {
            let registry = self.registry.clone();
            let id = id.to_string();
            Box::pin(async move { registry.has_enough_stock(tx, &id, required).await })
        })
        .await
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    pub async fn create_deposit(&self, input: NewDeposit) -> LedgerResult<Deposit> {
        self.write("create_deposit", |tx| {
            let lifecycle = self.lifecycle.clone();
            let input = input.clone();
            Box::pin(async move { lifecycle.create_deposit(tx, input).await })
        })
        .await
    }

    pub async fn record_return(&self, deposit_id: &str, quantity: i64, notes: Option<String>) -> LedgerResult<ReturnReceipt> {
        self.write("record_return", |tx| {
            let lifecycle = self.lifecycle.clone();
            let deposit_id = deposit_id.to_string();
            let notes = notes.clone();
            Box::pin(async move { lifecycle.record_return(tx, &deposit_id, quantity, notes).await })
        })
        .await
    }

    pub async fn cancel_deposit(&self, deposit_id: &str) -> LedgerResult<Deposit> {
        self.write("cancel_deposit", |tx| {
            let lifecycle = self.lifecycle.clone();
            let deposit_id = deposit_id.to_string();
            Box::pin(async move { lifecycle.cancel(tx, &deposit_id).await })
        })
        .await
    }

    pub async fn deposit(&self, deposit_id: &str) -> LedgerResult<Deposit> {
        self.run("deposit", |tx| {
            let lifecycle = self.lifecycle.clone();
            let deposit_id = deposit_id.to_string();
            Box::pin(async move { lifecycle.get(tx, &deposit_id).await })
        })
        .await
    }

    pub async fn deposit_by_reference(&self, reference: &str) -> LedgerResult<Deposit> {
        self.run("deposit_by_reference", |tx| {
            let lifecycle = self.lifecycle.clone();
            let reference = reference.to_string();
            Box::pin(async move { lifecycle.get_by_reference(tx, &reference).await })
        })
        .await
    }

    pub async fn deposits(&self, filter: DepositFilter) -> LedgerResult<Vec<Deposit>> {
        self.run("deposits", |tx| {
            let lifecycle = self.lifecycle.clone();
            let filter = filter.clone();
            Box::pin(async move { lifecycle.list(tx, &filter).await })
        })
        .await
    }

    pub async fn deposit_returns(&self, deposit_id: &str) -> LedgerResult<Vec<DepositReturn>> {
        self.run("deposit_returns", |tx| {
            let lifecycle = self.lifecycle.clone();
            let deposit_id = deposit_id.to_string();
            Box::pin(async move { lifecycle.returns_for(tx, &deposit_id).await })
        })
        .await
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn submit_sale(&self, request: SaleRequest) -> LedgerResult<DocumentReceipt> {
        self.write("submit_sale", |tx| {
            let coordinator = self.coordinator.clone();
            let request = request.clone();
            Box::pin(async move { coordinator.submit_sale(tx, &request).await })
        })
        .await
    }

    pub async fn receive_purchase(&self, request: PurchaseRequest) -> LedgerResult<DocumentReceipt> {
        self.write("receive_purchase", |tx| {
            let coordinator = self.coordinator.clone();
            let request = request.clone();
            Box::pin(async move { coordinator.receive_purchase(tx, &request).await })
        })
        .await
    }

    pub async fn adjust_stock(&self, request: AdjustmentRequest) -> LedgerResult<DocumentReceipt> {
        self.write("adjust_stock", |tx| {
            let coordinator = self.coordinator.clone();
            let request = request.clone();
            Box::pin(async move { coordinator.adjust_stock(tx, &request).await })
        })
        .await
    }

    // =========================================================================
    // Valuation
    // =========================================================================

    /// Dashboard snapshot, served from cache while it is fresh.
    pub async fn valuation(&self) -> LedgerResult<ValuationSnapshot> {
        if let Some(cached) = self.cache.get().await {
            return Ok(cached);
        }
        self.refresh_valuation().await
    }

    /// Computes a new snapshot and replaces the cached one.
    pub async fn refresh_valuation(&self) -> LedgerResult<ValuationSnapshot> {
        let snapshot = self
            .run("valuation", |tx| {
                let valuation = self.valuation.clone();
                Box::pin(async move { valuation.snapshot(tx).await })
            })
            .await?;

        self.cache.put(snapshot.clone()).await;
        Ok(snapshot)
    }

    pub async fn timeline(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> LedgerResult<Timeline> {
        self.run("timeline", |tx| {
            let valuation = self.valuation.clone();
            Box::pin(async move { valuation.timeline(tx, from, to).await })
        })
        .await
    }

    /// Timeline over the configured window (`valuation.timeline_days`).
    pub async fn recent_timeline(&self) -> LedgerResult<Timeline> {
        let days = self.config.valuation.timeline_days;
        self.run("recent_timeline", |tx| {
            let valuation = self.valuation.clone();
            Box::pin(async move { valuation.recent_timeline(tx, days).await })
        })
        .await
    }
}

// =============================================================================
// Movement History
// =============================================================================

/// Restartable newest-first walk over one product's movements.
///
/// Each page is read in its own short transaction. Save [`cursor`] to pick
/// the walk up later with [`LedgerEngine::resume_movements`].
///
/// [`cursor`]: MovementHistory::cursor
pub struct MovementHistory<'e> {
    engine: &'e LedgerEngine,
    product_id: String,
    filter: MovementFilter,
    page_size: u32,
    cursor: Option<MovementCursor>,
    exhausted: bool,
}

impl MovementHistory<'_> {
    /// The next page, or `None` once the history is exhausted.
    pub async fn next_page(&mut self) -> LedgerResult<Option<Vec<StockMovement>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .engine
            .movements_page(&self.product_id, &self.filter, self.cursor, self.page_size)
            .await?;

        self.exhausted = page.next.is_none();
        if let Some(last) = page.items.last() {
            self.cursor = Some(MovementCursor(last.seq));
        }

        if page.items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page.items))
        }
    }

    /// Position after the last page handed out.
    pub fn cursor(&self) -> Option<MovementCursor> {
        self.cursor
    }

    /// Drains the remaining pages.
    pub async fn collect_all(mut self) -> LedgerResult<Vec<StockMovement>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::coordinator::{Packaging, SaleLine};
    use crate::testing::{engine, product_input, FileLedger};
    use ledger_core::deposit::is_conserved;
    use ledger_core::{Counterparty, DepositDirection, DepositStatus, ErrorKind, LedgerError, PaymentTerms};

    #[tokio::test]
    async fn test_retry_until_success() {
        let (engine, _clock) = engine().await;
        let calls = AtomicUsize::new(0);

        let value = engine
            .run("flaky", |_tx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n < 2 {
                        Err(LedgerError::ConcurrencyConflict(format!("attempt {n}")))
                    } else {
                        Ok(n)
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded_and_skips_other_errors() {
        let (engine, _clock) = engine().await;

        let calls = AtomicUsize::new(0);
        let err = engine
            .run("always_conflicts", |_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err::<(), _>(LedgerError::ConcurrencyConflict("product p".into())) })
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), engine.config().retry.max_attempts as usize);

        let calls = AtomicUsize::new(0);
        let err = engine
            .run("not_found", |_tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err::<(), _>(LedgerError::not_found("Product", "p")) })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_unit_leaves_no_trace() {
        let (engine, _clock) = engine().await;
        let product = engine
            .register_product(product_input("BEER-PIL-001"), 10, "u-1")
            .await
            .unwrap();

        let stock = engine.stock().clone();
        let product_id = product.id.clone();
        let err = engine
            .run("half_done", |tx| {
                let stock = stock.clone();
                let product_id = product_id.clone();
                Box::pin(async move {
                    stock
                        .add_stock(tx, &StockChange::new(&product_id, 5, "restock", "u-1"))
                        .await?;
                    Err::<(), _>(LedgerError::Persistence("disk full".into()))
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let audit = engine.verify_product(&product.id).await.unwrap();
        assert_eq!(audit.current_stock, 10);
        assert_eq!(audit.ledger_sum, 10);
    }

    #[tokio::test]
    async fn test_scenario_restock_then_sell_down_to_low_stock() {
        let (engine, _clock) = engine().await;
        let mut input = product_input("BEER-PIL-001");
        input.min_stock = 5;
        let product = engine.register_product(input, 10, "u-1").await.unwrap();

        let added = engine
            .add_stock(StockChange::new(&product.id, 20, "restock", "u-1"))
            .await
            .unwrap();
        assert_eq!(added.new_stock, 30);

        let removed = engine
            .remove_stock(StockChange::new(&product.id, 25, "sale", "u-1"))
            .await
            .unwrap();
        assert_eq!(removed.new_stock, 5);

        let snapshot = engine.refresh_valuation().await.unwrap();
        assert_eq!(snapshot.low_stock_count, 1);
        assert_eq!(snapshot.low_stock[0].product_id, product.id);
        let audit = engine.verify_product(&product.id).await.unwrap();
        assert!(audit.is_consistent());
    }

    #[tokio::test]
    async fn test_concurrent_removals_never_oversell() {
        let (engine, _clock) = engine().await;
        let engine = Arc::new(engine);
        let product = engine
            .register_product(product_input("SODA-COL-001"), 10, "u-1")
            .await
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let engine = engine.clone();
                let change = StockChange::new(&product.id, 6, "sale", format!("cashier-{i}"));
                tokio::spawn(async move { engine.remove_stock(change).await })
            })
            .collect();

        let mut ok = 0;
        let mut short = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientStock { available, .. }) => {
                    assert_eq!(available, 4);
                    short += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((ok, short), (1, 1));

        let audit = engine.verify_product(&product.id).await.unwrap();
        assert_eq!(audit.current_stock, 4);
        assert!(audit.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_snapshot_write_is_a_retryable_conflict() {
        let f = FileLedger::new().await;
        let engine = &f.engine;
        let product = engine
            .register_product(product_input("BEER-PIL-001"), 10, "u-1")
            .await
            .unwrap();
        let stock = engine.stock().clone();
        let db = engine.database();

        let mut first = db.begin().await.unwrap();
        let mut second = db.begin().await.unwrap();
        // Pin the second transaction's snapshot at version 0.
        db.products().require(&mut second, &product.id).await.unwrap();

        stock
            .remove_stock(&mut first, &StockChange::new(&product.id, 3, "sale", "cashier-1"))
            .await
            .unwrap();
        first.commit().await.unwrap();

        let err = stock
            .remove_stock(&mut second, &StockChange::new(&product.id, 3, "sale", "cashier-2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert!(err.is_retryable());
        second.rollback().await.unwrap();

        // Through the engine the same change simply goes through.
        let movement = engine
            .remove_stock(StockChange::new(&product.id, 3, "sale", "cashier-2"))
            .await
            .unwrap();
        assert_eq!((movement.previous_stock, movement.new_stock), (7, 4));
        assert!(engine.verify_product(&product.id).await.unwrap().is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_removals_on_a_shared_file_never_oversell() {
        let f = FileLedger::new().await;

        for round in 0..5 {
            let product = f
                .engine
                .register_product(product_input(&format!("SODA-COL-{round:03}")), 10, "u-1")
                .await
                .unwrap();

            let handles: Vec<_> = (0..2)
                .map(|i| {
                    let engine = f.engine.clone();
                    let change = StockChange::new(&product.id, 6, "sale", format!("cashier-{i}"));
                    tokio::spawn(async move { engine.remove_stock(change).await })
                })
                .collect();

            let mut ok = 0;
            let mut short = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(LedgerError::InsufficientStock { .. }) => short += 1,
                    Err(other) => panic!("round {round}: unexpected error: {other:?}"),
                }
            }
            assert_eq!((ok, short), (1, 1), "round {round}");

            let audit = f.engine.verify_product(&product.id).await.unwrap();
            assert_eq!(audit.current_stock, 4, "round {round}");
            assert!(audit.is_consistent());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_returns_on_a_shared_file_never_over_return() {
        let f = FileLedger::new().await;
        let engine = &f.engine;
        let keg = engine
            .create_deposit_type(NewDepositType {
                name: "Keg 20L".into(),
                amount_cents: 500,
            })
            .await
            .unwrap();
        let supplier = engine.register_party(CounterpartyKind::Supplier, "Brouwerij Noord").await.unwrap();
        let deposit = engine
            .create_deposit(NewDeposit {
                direction: DepositDirection::Incoming,
                deposit_type_id: keg.id.clone(),
                counterparty: Counterparty::Supplier(supplier.id.clone()),
                quantity: 10,
                unit_amount_cents: 500,
                source_reference: None,
                notes: None,
            })
            .await
            .unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let engine = engine.clone();
                let id = deposit.id.clone();
                tokio::spawn(async move { engine.record_return(&id, 3, None).await })
            })
            .collect();

        let mut ok = 0;
        let mut over = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::OverReturn { .. }) => over += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((ok, over), (3, 2));

        let stored = engine.deposit(&deposit.id).await.unwrap();
        assert_eq!((stored.quantity_returned, stored.quantity_pending), (9, 1));
        assert_eq!(stored.status, DepositStatus::Partial);
        assert!(is_conserved(&stored));

        let returns = engine.deposit_returns(&deposit.id).await.unwrap();
        assert_eq!(returns.len(), 3);
        assert_eq!(returns.iter().map(|r| r.refund_cents).sum::<i64>(), 9 * 500);
    }

    #[tokio::test]
    async fn test_concurrent_outgoing_deposits_respect_type_stock() {
        let (engine, _clock) = engine().await;
        let engine = Arc::new(engine);
        let crate_type = engine
            .create_deposit_type(NewDepositType {
                name: "Crate".into(),
                amount_cents: 500,
            })
            .await
            .unwrap();
        let supplier = engine.register_party(CounterpartyKind::Supplier, "Brouwerij Noord").await.unwrap();
        let customer = engine.register_party(CounterpartyKind::Customer, "Cafe De Hoek").await.unwrap();

        engine
            .create_deposit(NewDeposit {
                direction: DepositDirection::Incoming,
                deposit_type_id: crate_type.id.clone(),
                counterparty: Counterparty::Supplier(supplier.id.clone()),
                quantity: 10,
                unit_amount_cents: 500,
                source_reference: None,
                notes: None,
            })
            .await
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                let input = NewDeposit {
                    direction: DepositDirection::Outgoing,
                    deposit_type_id: crate_type.id.clone(),
                    counterparty: Counterparty::Customer(customer.id.clone()),
                    quantity: 6,
                    unit_amount_cents: 500,
                    source_reference: None,
                    notes: None,
                };
                tokio::spawn(async move { engine.create_deposit(input).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(LedgerError::InsufficientDepositStock { .. }))));

        assert_eq!(engine.deposit_type_stock(&crate_type.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_deposit_scenario_through_engine() {
        let (engine, _clock) = engine().await;
        let keg = engine
            .create_deposit_type(NewDepositType {
                name: "Keg 20L".into(),
                amount_cents: 500,
            })
            .await
            .unwrap();
        let supplier = engine.register_party(CounterpartyKind::Supplier, "Brouwerij Noord").await.unwrap();

        let deposit = engine
            .create_deposit(NewDeposit {
                direction: DepositDirection::Incoming,
                deposit_type_id: keg.id.clone(),
                counterparty: Counterparty::Supplier(supplier.id.clone()),
                quantity: 10,
                unit_amount_cents: 500,
                source_reference: None,
                notes: None,
            })
            .await
            .unwrap();

        let first = engine.record_return(&deposit.id, 4, None).await.unwrap();
        assert_eq!(first.deposit.status, DepositStatus::Partial);
        assert_eq!(first.record.refund_cents, 2000);

        let over = engine.record_return(&deposit.id, 7, None).await.unwrap_err();
        assert_eq!(over.kind(), ErrorKind::OverReturn);

        let last = engine.record_return(&deposit.id, 6, None).await.unwrap();
        assert_eq!(last.deposit.status, DepositStatus::Returned);
        assert!(is_conserved(&last.deposit));

        let by_ref = engine.deposit_by_reference(&deposit.reference).await.unwrap();
        assert_eq!(by_ref.quantity_returned, 10);
        assert_eq!(engine.deposit_returns(&deposit.id).await.unwrap().len(), 2);

        let err = engine.delete_deposit_type(&keg.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_failed_sale_is_a_no_op() {
        let (engine, _clock) = engine().await;
        let pils = engine
            .register_product(product_input("BEER-PIL-001"), 10, "u-1")
            .await
            .unwrap();
        let crate_type = engine
            .create_deposit_type(NewDepositType {
                name: "Crate".into(),
                amount_cents: 390,
            })
            .await
            .unwrap();
        let customer = engine.register_party(CounterpartyKind::Customer, "Bar Centraal").await.unwrap();

        // Product stock is fine, packaging is not: the whole sale is refused.
        let err = engine
            .submit_sale(SaleRequest {
                customer_id: Some(customer.id.clone()),
                terms: PaymentTerms::Credit,
                lines: vec![SaleLine {
                    product_id: pils.id.clone(),
                    quantity: 2,
                    unit_price_cents: None,
                    packaging: Some(Packaging {
                        deposit_type_id: crate_type.id.clone(),
                        quantity: 2,
                    }),
                }],
                actor_id: "cashier-1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        let audit = engine.verify_product(&pils.id).await.unwrap();
        assert_eq!(audit.current_stock, 10);
        assert!(engine.deposits(DepositFilter::default()).await.unwrap().is_empty());

        let mut tx = engine.database().begin().await.unwrap();
        let party = engine
            .database()
            .parties()
            .require(&mut tx, CounterpartyKind::Customer, &customer.id)
            .await
            .unwrap();
        assert_eq!(party.balance_cents, 0);
    }

    #[tokio::test]
    async fn test_movement_history_resumes_from_cursor() {
        let (engine, _clock) = engine().await;
        let product = engine
            .register_product(product_input("WATR-SPA-001"), 0, "u-1")
            .await
            .unwrap();
        for qty in 1..=5 {
            engine
                .add_stock(StockChange::new(&product.id, qty, "restock", "u-1"))
                .await
                .unwrap();
        }

        let mut history = engine.movements_for(&product.id, MovementFilter::default(), 2);
        let first = history.next_page().await.unwrap().unwrap();
        assert_eq!(first.iter().map(|m| m.quantity).collect::<Vec<_>>(), vec![5, 4]);
        let saved = history.cursor().unwrap();

        // New activity does not disturb the saved position.
        engine
            .add_stock(StockChange::new(&product.id, 9, "restock", "u-1"))
            .await
            .unwrap();

        let rest = engine
            .resume_movements(&product.id, MovementFilter::default(), 2, saved)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|m| m.quantity).collect::<Vec<_>>(), vec![3, 2, 1]);

        let everything = engine
            .movements_for(&product.id, MovementFilter::default(), 50)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(everything.len(), 6);
    }

    #[tokio::test]
    async fn test_cursor_saved_after_last_page_resumes_empty() {
        let (engine, _clock) = engine().await;
        let product = engine
            .register_product(product_input("WATR-STI-001"), 0, "u-1")
            .await
            .unwrap();
        for qty in 1..=4 {
            engine
                .add_stock(StockChange::new(&product.id, qty, "restock", "u-1"))
                .await
                .unwrap();
        }

        let mut history = engine.movements_for(&product.id, MovementFilter::default(), 2);
        let first = history.next_page().await.unwrap().unwrap();
        assert_eq!(first.iter().map(|m| m.quantity).collect::<Vec<_>>(), vec![4, 3]);
        let second = history.next_page().await.unwrap().unwrap();
        assert_eq!(second.iter().map(|m| m.quantity).collect::<Vec<_>>(), vec![2, 1]);
        assert!(history.next_page().await.unwrap().is_none());

        let saved = history.cursor().unwrap();
        assert_eq!(saved, MovementCursor(second[1].seq));

        let rest = engine
            .resume_movements(&product.id, MovementFilter::default(), 2, saved)
            .collect_all()
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected_not_overflowed() {
        let (engine, _clock) = engine().await;
        let supplier = engine.register_party(CounterpartyKind::Supplier, "Brouwerij Noord").await.unwrap();

        let err = engine
            .create_deposit_type(NewDepositType {
                name: "Keg 50L".into(),
                amount_cents: i64::MAX / 2,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let keg = engine
            .create_deposit_type(NewDepositType {
                name: "Keg 50L".into(),
                amount_cents: 6000,
            })
            .await
            .unwrap();
        let err = engine
            .create_deposit(NewDeposit {
                direction: DepositDirection::Incoming,
                deposit_type_id: keg.id.clone(),
                counterparty: Counterparty::Supplier(supplier.id.clone()),
                quantity: 10,
                unit_amount_cents: i64::MAX / 2,
                source_reference: None,
                notes: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let pils = engine
            .register_product(product_input("BEER-PIL-001"), 10, "u-1")
            .await
            .unwrap();
        let err = engine
            .submit_sale(SaleRequest {
                customer_id: None,
                terms: PaymentTerms::Cash,
                lines: vec![SaleLine {
                    product_id: pils.id.clone(),
                    quantity: 3,
                    unit_price_cents: Some(i64::MAX / 2),
                    packaging: None,
                }],
                actor_id: "cashier-1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(engine.verify_product(&pils.id).await.unwrap().current_stock, 10);
    }

    #[tokio::test]
    async fn test_valuation_cache_is_dropped_by_engine_writes() {
        let db = Database::new(ledger_db::DbConfig::in_memory()).await.unwrap();
        let mut config = LedgerConfig::in_memory();
        config.valuation.cache_ttl_secs = 30;
        let clock: Arc<dyn Clock> = Arc::new(ledger_core::FixedClock::new(crate::testing::test_now()));
        let engine = LedgerEngine::new(db, clock, config);

        let product = engine
            .register_product(product_input("BEER-PIL-001"), 10, "u-1")
            .await
            .unwrap();
        assert_eq!(engine.valuation().await.unwrap().units_on_hand, 10);

        // A raw unit of work does not touch the cache.
        let stock = engine.stock().clone();
        let product_id = product.id.clone();
        engine
            .run("raw_restock", |tx| {
                let stock = stock.clone();
                let product_id = product_id.clone();
                Box::pin(async move {
                    stock
                        .add_stock(tx, &StockChange::new(&product_id, 1, "restock", "u-1"))
                        .await
                })
            })
            .await
            .unwrap();
        assert_eq!(engine.valuation().await.unwrap().units_on_hand, 10);

        engine
            .add_stock(StockChange::new(&product.id, 5, "restock", "u-1"))
            .await
            .unwrap();
        assert_eq!(engine.valuation().await.unwrap().units_on_hand, 16);
    }

    #[tokio::test]
    async fn test_conservation_over_mixed_activity() {
        let (engine, _clock) = engine().await;
        let product = engine
            .register_product(product_input("JUIC-ORA-001"), 7, "u-1")
            .await
            .unwrap();

        let ops: [(bool, i64); 6] = [(true, 5), (false, 3), (false, 20), (true, 1), (false, 10), (false, 1)];
        for (inbound, qty) in ops {
            let change = StockChange::new(&product.id, qty, "mixed", "u-1");
            let _ = if inbound {
                engine.add_stock(change).await
            } else {
                engine.remove_stock(change).await
            };
        }

        let audit = engine.verify_product(&product.id).await.unwrap();
        assert!(audit.is_consistent());
        assert!(audit.current_stock >= 0);
        // 7 +5 -3 (-20 refused) +1 -10 (-1 after that)
        assert_eq!(audit.current_stock, 0);
    }
}
