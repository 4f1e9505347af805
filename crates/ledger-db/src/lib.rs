//! # ledger-db: Database Layer for the Stock Ledger
//!
//! SQLite storage for products, the movement ledger, deposits and documents,
//! using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Ledger Data Flow                           │
//! │                                                                         │
//! │  ledger-engine (remove_stock, record_return, submit_sale, ...)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ledger-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ProductRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │    │ MovementRepo  │    │ 001_initial_ │  │   │
//! │  │   │ begin() → tx  │◄───│ DepositRepo   │    │   schema.sql │  │   │
//! │  │   │               │    │ ...           │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration and transactions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and their mapping onto `LedgerError`
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/ledger.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let product = db.products().require(&mut tx, "product-id").await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbTx};

pub use repository::deposit::{DepositRepository, OutstandingTotals};
pub use repository::deposit_return::{DailyReturns, DepositReturnRepository};
pub use repository::deposit_type::{DepositTypeRepository, TypeCirculation};
pub use repository::document::DocumentRepository;
pub use repository::movement::{DailyMovement, MovementRepository};
pub use repository::party::PartyRepository;
pub use repository::product::{ProductRepository, StockTotals};
