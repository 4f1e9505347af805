//! # ledger-engine: Transaction Boundaries for the Stock Ledger
//!
//! This crate turns the pure rules in `ledger-core` and the repositories in
//! `ledger-db` into business operations. Every operation runs as a single
//! unit of work and is retried when it loses a version race.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LedgerEngine (facade)                           │
//! │                                                                         │
//! │   run(op, |tx| …)   BEGIN → work → COMMIT, retry on conflict            │
//! │                               │                                         │
//! │     ┌────────────────┬────────┴───────┬─────────────────┐               │
//! │     ▼                ▼                ▼                 ▼               │
//! │  ┌──────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Stock   │  │  Deposit   │  │   Deposit    │  │ Transaction  │      │
//! │  │  Ledger  │  │  Type      │  │  Lifecycle   │  │ Coordinator  │      │
//! │  │          │  │  Registry  │  │              │  │              │      │
//! │  │ add/     │  │ catalogue, │  │ open, return │  │ sale,        │      │
//! │  │ remove,  │  │ on-hand    │  │ cancel,      │  │ purchase,    │      │
//! │  │ history  │  │ packaging  │  │ DIN-/DOUT-   │  │ adjustment   │      │
//! │  └──────────┘  └────────────┘  └──────────────┘  └──────────────┘      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  ValuationProjection + SnapshotCache (read-only, TTL cached)    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - `LedgerEngine` facade and the unit-of-work runner
//! - [`config`] - `ledger.toml` configuration with env overrides
//! - [`error`] - Configuration errors
//! - [`stock`] - Stock ledger: movements, history, product lifecycle
//! - [`registry`] - Deposit type catalogue and packaging on hand
//! - [`lifecycle`] - Deposit open/return/cancel
//! - [`coordinator`] - Multi-line sales, purchases and adjustments
//! - [`valuation`] - Dashboard snapshot and movement timeline
//!
//! Component methods take `&mut DbTx` and never commit. Callers outside the
//! engine compose them with [`LedgerEngine::run`].

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod stock;
pub mod valuation;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::LedgerConfig;
pub use coordinator::{
    AdjustmentLine, AdjustmentRequest, DocumentReceipt, Packaging, PurchaseLine,
    PurchaseRequest, SaleLine, SaleRequest, TransactionCoordinator,
};
pub use engine::{LedgerEngine, MovementHistory, TxFuture};
pub use error::{ConfigError, ConfigResult};
pub use lifecycle::{DepositLifecycle, ReturnReceipt};
pub use registry::DepositTypeRegistry;
pub use stock::{StockAudit, StockChange, StockLedger};
pub use valuation::{SnapshotCache, Timeline, ValuationProjection, ValuationSnapshot};
