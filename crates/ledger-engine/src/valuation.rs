//! # Valuation Projection
//!
//! Read-only dashboard figures over products and deposits. All queries for
//! one snapshot run in the same read transaction, so SQLite's WAL snapshot
//! makes them agree with each other even while writers commit.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ValuationSnapshot                                                      │
//! │    stock value        Σ stock × cost, Σ stock × price                  │
//! │    low / out of stock 0 < stock <= min,  stock == 0                    │
//! │    deposits           liability (outgoing), receivable (incoming)      │
//! │    circulation        per type: on hand (>= 0), issued, owed back      │
//! │                                                                         │
//! │  Timeline            per day: units in/out, returns, refunds           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Snapshots may be served from a [`SnapshotCache`] for a configured TTL.
//! Write paths never look at the cache.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use ledger_core::{Clock, LedgerResult, Money, ValidationError};
use ledger_db::{
    DailyMovement, DailyReturns, DbTx, DepositRepository, DepositReturnRepository,
    DepositTypeRepository, MovementRepository, ProductRepository,
};

/// A product at or below its minimum but not yet out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockItem {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    pub min_stock: i64,
}

/// Where the packaging of one type is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStock {
    pub deposit_type_id: String,
    pub name: String,
    /// On hand, never negative.
    pub in_stock: i64,
    /// With customers.
    pub issued_pending: i64,
    /// Still to go back to suppliers.
    pub owed_back: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub taken_at: DateTime<Utc>,
    pub product_count: i64,
    pub units_on_hand: i64,
    pub cost_value: Money,
    pub sell_value: Money,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
    pub low_stock: Vec<LowStockItem>,
    /// Owed to customers for packaging they hold.
    pub deposit_liability: Money,
    /// Owed to us by suppliers for packaging we hold.
    pub deposit_receivable: Money,
    pub open_outgoing_deposits: i64,
    pub open_incoming_deposits: i64,
    pub circulation: Vec<TypeStock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDay {
    /// `YYYY-MM-DD` (UTC).
    pub day: String,
    pub quantity_in: i64,
    pub quantity_out: i64,
    pub movement_count: i64,
}

impl From<DailyMovement> for MovementDay {
    fn from(row: DailyMovement) -> Self {
        MovementDay {
            day: row.day,
            quantity_in: row.quantity_in,
            quantity_out: row.quantity_out,
            movement_count: row.movement_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDay {
    pub day: String,
    pub quantity: i64,
    pub refund: Money,
    pub return_count: i64,
}

impl From<DailyReturns> for ReturnDay {
    fn from(row: DailyReturns) -> Self {
        ReturnDay {
            day: row.day,
            quantity: row.quantity,
            refund: Money::from_cents(row.refund_cents),
            return_count: row.return_count,
        }
    }
}

/// Per-day activity over `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub movements: Vec<MovementDay>,
    pub returns: Vec<ReturnDay>,
}

#[derive(Clone)]
pub struct ValuationProjection {
    clock: Arc<dyn Clock>,
    products: ProductRepository,
    movements: MovementRepository,
    types: DepositTypeRepository,
    deposits: DepositRepository,
    returns: DepositReturnRepository,
}

impl ValuationProjection {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        ValuationProjection {
            clock,
            products: ProductRepository,
            movements: MovementRepository,
            types: DepositTypeRepository,
            deposits: DepositRepository,
            returns: DepositReturnRepository,
        }
    }

    /// Computes a snapshot. Run it in its own transaction so every figure
    /// comes from the same point in time.
    pub async fn snapshot(&self, tx: &mut DbTx) -> LedgerResult<ValuationSnapshot> {
        let totals = self.products.stock_totals(tx).await?;
        let low_stock = self
            .products
            .list_low_stock(tx)
            .await?
            .into_iter()
            .map(|p| LowStockItem {
                product_id: p.id,
                sku: p.sku,
                name: p.name,
                current_stock: p.current_stock,
                min_stock: p.min_stock,
            })
            .collect();

        let outstanding = self.deposits.outstanding(tx).await?;
        let circulation = self
            .types
            .circulation(tx)
            .await?
            .into_iter()
            .map(|c| TypeStock {
                in_stock: (c.received - c.issued_pending).max(0),
                deposit_type_id: c.deposit_type_id,
                name: c.name,
                issued_pending: c.issued_pending.max(0),
                owed_back: c.owed_back.max(0),
            })
            .collect();

        Ok(ValuationSnapshot {
            taken_at: self.clock.now(),
            product_count: totals.product_count,
            units_on_hand: totals.units_on_hand.max(0),
            cost_value: Money::from_cents(totals.cost_value_cents.max(0)),
            sell_value: Money::from_cents(totals.sell_value_cents.max(0)),
            low_stock_count: totals.low_stock_count,
            out_of_stock_count: totals.out_of_stock_count,
            low_stock,
            deposit_liability: Money::from_cents(outstanding.outgoing_cents.max(0)),
            deposit_receivable: Money::from_cents(outstanding.incoming_cents.max(0)),
            open_outgoing_deposits: outstanding.open_outgoing,
            open_incoming_deposits: outstanding.open_incoming,
            circulation,
        })
    }

    /// Per-day movements and returns in `[from, to)`.
    pub async fn timeline(&self, tx: &mut DbTx, from: DateTime<Utc>, to: DateTime<Utc>) -> LedgerResult<Timeline> {
        if from >= to {
            return Err(ValidationError::Inconsistent {
                field: "timeline range".to_string(),
                reason: format!("from ({from}) must be before to ({to})"),
            }
            .into());
        }

        let movements = self.movements.daily_totals(tx, from, to).await?;
        let returns = self.returns.daily_totals(tx, from, to).await?;

        Ok(Timeline {
            from,
            to,
            movements: movements.into_iter().map(MovementDay::from).collect(),
            returns: returns.into_iter().map(ReturnDay::from).collect(),
        })
    }

    /// Whole UTC days: the last `days` calendar days including today.
    pub async fn recent_timeline(&self, tx: &mut DbTx, days: u32) -> LedgerResult<Timeline> {
        let tomorrow = self.clock.today() + Duration::days(1);
        let to = Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::default()));
        let from = to - Duration::days(i64::from(days));
        self.timeline(tx, from, to).await
    }
}

/// TTL-bounded holder for the last snapshot.
pub struct SnapshotCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slot: RwLock<Option<ValuationSnapshot>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        SnapshotCache {
            ttl,
            clock,
            slot: RwLock::new(None),
        }
    }

    /// The cached snapshot if it is younger than the TTL.
    pub async fn get(&self) -> Option<ValuationSnapshot> {
        if self.ttl <= Duration::zero() {
            return None;
        }

        let slot = self.slot.read().await;
        let snapshot = slot.as_ref()?;
        let age = self.clock.now() - snapshot.taken_at;
        if age < self.ttl {
            debug!(age_ms = age.num_milliseconds(), "Valuation served from cache");
            Some(snapshot.clone())
        } else {
            None
        }
    }

    pub async fn put(&self, snapshot: ValuationSnapshot) {
        if self.ttl > Duration::zero() {
            *self.slot.write().await = Some(snapshot);
        }
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
