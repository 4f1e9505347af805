//! # Domain Types
//!
//! Core domain types used throughout the stock ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  StockMovement  │   │  DepositType    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  current_stock  │◄──│  direction      │   │  amount_cents   │       │
//! │  │  min_stock      │   │  previous/new   │   │  is_active      │       │
//! │  │  version        │   │  (append-only)  │   └────────┬────────┘       │
//! │  └─────────────────┘   └─────────────────┘            │                │
//! │                                                       ▼                │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Counterparty   │   │ DepositReturn   │   │    Deposit      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Customer(id)   │──►│  quantity       │──►│  pending        │       │
//! │  │  Supplier(id)   │   │  refund_cents   │   │  returned       │       │
//! │  └─────────────────┘   │  (append-only)  │   │  status         │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity has a UUID v4 `id`. Deposits and documents also carry a
//! human-readable business reference (`DOUT-20260131-7QX2KD`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A stocked product.
///
/// `current_stock` is only ever changed through the stock ledger, which
/// appends a [`StockMovement`] for every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name.
    pub name: String,

    /// Current stock level, never negative.
    pub current_stock: i64,

    /// Low-stock threshold.
    pub min_stock: i64,

    /// Cost in cents (stock valuation at cost).
    pub cost_cents: i64,

    /// Sell price in cents.
    pub price_cents: i64,

    /// Whether product is active (soft retire).
    pub is_active: bool,

    /// Optimistic concurrency counter, bumped on every stock write.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the sell price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Returns the cost price as a Money type.
    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }
}

/// Input for registering a product. Opening stock is booked separately as a
/// movement so the ledger reconstructs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub min_stock: i64,
    pub cost_cents: i64,
    pub price_cents: i64,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    In,
    Out,
}

impl MovementDirection {
    /// Signed quantity: positive for `In`, negative for `Out`.
    #[inline]
    pub const fn signed(&self, quantity: i64) -> i64 {
        match self {
            MovementDirection::In => quantity,
            MovementDirection::Out => -quantity,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementDirection::In => "in",
            MovementDirection::Out => "out",
        }
    }
}

impl fmt::Display for MovementDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry recording a single stock change and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    /// Insertion sequence, strictly increasing. Orders the ledger.
    pub seq: i64,
    pub id: String,
    pub product_id: String,
    pub direction: MovementDirection,
    /// Always positive; the direction carries the sign.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
    /// Sale/purchase/adjustment document number, if any.
    pub reference: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Filters for a product's movement history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub direction: Option<MovementDirection>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

/// Resume point in a newest-first movement sequence: the `seq` of the last
/// movement already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCursor(pub i64);

/// One page of a lazily fetched sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    /// `None` once the sequence is exhausted.
    pub next: Option<C>,
}

// =============================================================================
// Deposits
// =============================================================================

/// Which way returnable packaging flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DepositDirection {
    /// Received from a supplier (we paid the deposit).
    Incoming,
    /// Issued to a customer (the customer paid the deposit).
    Outgoing,
}

impl DepositDirection {
    /// The counterparty kind a deposit in this direction must have.
    pub const fn counterparty_kind(&self) -> CounterpartyKind {
        match self {
            DepositDirection::Incoming => CounterpartyKind::Supplier,
            DepositDirection::Outgoing => CounterpartyKind::Customer,
        }
    }
}

impl fmt::Display for DepositDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositDirection::Incoming => f.write_str("incoming"),
            DepositDirection::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// Deposit status.
///
/// ```text
/// active ──► partial ──► returned
///   │           │
///   └─────┬─────┘
///         ▼
///     cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    #[default]
    Active,
    Partial,
    Returned,
    Cancelled,
}

impl DepositStatus {
    /// Active and partial deposits still have packaging out.
    pub const fn is_open(&self) -> bool {
        matches!(self, DepositStatus::Active | DepositStatus::Partial)
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositStatus::Active => "active",
            DepositStatus::Partial => "partial",
            DepositStatus::Returned => "returned",
            DepositStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Discriminant of [`Counterparty`], stored in its own column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyKind {
    Customer,
    Supplier,
}

impl fmt::Display for CounterpartyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterpartyKind::Customer => f.write_str("customer"),
            CounterpartyKind::Supplier => f.write_str("supplier"),
        }
    }
}

/// The other side of a deposit or document. Exactly one of customer or
/// supplier, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Counterparty {
    Customer(String),
    Supplier(String),
}

impl Counterparty {
    pub fn from_parts(kind: CounterpartyKind, id: impl Into<String>) -> Self {
        match kind {
            CounterpartyKind::Customer => Counterparty::Customer(id.into()),
            CounterpartyKind::Supplier => Counterparty::Supplier(id.into()),
        }
    }

    pub fn kind(&self) -> CounterpartyKind {
        match self {
            Counterparty::Customer(_) => CounterpartyKind::Customer,
            Counterparty::Supplier(_) => CounterpartyKind::Supplier,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Counterparty::Customer(id) | Counterparty::Supplier(id) => id,
        }
    }
}

/// A kind of returnable packaging with a fixed per-unit deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DepositType {
    pub id: String,
    pub name: String,
    /// Deposit per unit, in cents.
    pub amount_cents: i64,
    pub is_active: bool,
    /// Bumped whenever an outgoing deposit of this type is issued.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositType {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// Input for registering a deposit type. New types start active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDepositType {
    pub name: String,
    pub amount_cents: i64,
}

/// Partial update for a deposit type. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositTypeUpdate {
    pub name: Option<String>,
    pub amount_cents: Option<i64>,
    pub is_active: Option<bool>,
}

/// A returnable-packaging liability issued to a customer or received from a
/// supplier.
///
/// Invariant: `quantity_pending + quantity_returned == quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    /// Unique business reference, e.g. `DOUT-20260131-7QX2KD`.
    pub reference: String,
    pub direction: DepositDirection,
    pub deposit_type_id: String,
    pub counterparty: Counterparty,
    pub quantity: i64,
    pub quantity_pending: i64,
    pub quantity_returned: i64,
    pub unit_amount_cents: i64,
    pub status: DepositStatus,
    /// Number of the sale/purchase document that produced the deposit.
    pub source_reference: Option<String>,
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    #[inline]
    pub fn unit_amount(&self) -> Money {
        Money::from_cents(self.unit_amount_cents)
    }
}

/// Input for opening a deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeposit {
    pub direction: DepositDirection,
    pub deposit_type_id: String,
    pub counterparty: Counterparty,
    pub quantity: i64,
    pub unit_amount_cents: i64,
    pub source_reference: Option<String>,
    pub notes: Option<String>,
}

/// Immutable record of one return event against a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DepositReturn {
    pub id: String,
    pub deposit_id: String,
    pub quantity: i64,
    /// `quantity × unit_amount_cents` of the deposit.
    pub refund_cents: i64,
    pub notes: Option<String>,
    pub returned_at: DateTime<Utc>,
}

impl DepositReturn {
    #[inline]
    pub fn refund(&self) -> Money {
        Money::from_cents(self.refund_cents)
    }
}

/// Filters for deposit listings. All set filters must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositFilter {
    pub direction: Option<DepositDirection>,
    pub status: Option<DepositStatus>,
    pub deposit_type_id: Option<String>,
    pub counterparty: Option<Counterparty>,
}

// =============================================================================
// Counterparties & Documents
// =============================================================================

/// A customer or supplier with a running balance.
///
/// For customers the balance is what they owe us; for suppliers it is what
/// we owe them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Party {
    pub id: String,
    pub name: String,
    pub balance_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a sale or purchase is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    #[default]
    Cash,
    /// Settled later; moves the counterparty balance.
    Credit,
}

/// Business action that produced a group of movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Sale,
    Purchase,
    Adjustment,
}

impl DocumentKind {
    /// Prefix used in document numbers.
    pub const fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Sale => "SAL",
            DocumentKind::Purchase => "PUR",
            DocumentKind::Adjustment => "ADJ",
        }
    }
}

/// Header of a sale, purchase receipt or manual adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Human-readable number, used as the movement reference.
    pub number: String,
    pub kind: DocumentKind,
    pub counterparty: Option<Counterparty>,
    pub terms: PaymentTerms,
    pub total_cents: i64,
    pub reason: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// A frozen line of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DocumentLine {
    pub id: String,
    pub document_id: String,
    pub product_id: String,
    pub direction: MovementDirection,
    pub quantity: i64,
    /// Unit price (sales) or unit cost (purchases); zero for adjustments.
    pub unit_amount_cents: i64,
    pub line_total_cents: i64,
    /// Deposit opened for this line's packaging, if consigned.
    pub deposit_id: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================
