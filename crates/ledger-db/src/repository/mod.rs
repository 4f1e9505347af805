//! # Repository Module
//!
//! One repository per table group. Repositories are stateless; each method
//! takes the connection to run on, which is normally the engine's open
//! transaction (`&mut tx`).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ledger-engine                                                          │
//! │       │  let mut tx = db.begin().await?;                               │
//! │       ▼                                                                 │
//! │  ProductRepository      products              (versioned)              │
//! │  MovementRepository     stock_movements       (append-only)            │
//! │  DepositTypeRepository  deposit_types         (versioned)              │
//! │  DepositRepository      deposits              (versioned)              │
//! │  DepositReturnRepository deposit_returns      (append-only)            │
//! │  PartyRepository        customers, suppliers                           │
//! │  DocumentRepository     documents, document_lines                      │
//! │       │                                                                 │
//! │       ▼  tx.commit().await?                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod deposit;
pub mod deposit_return;
pub mod deposit_type;
pub mod document;
pub mod movement;
pub mod party;
pub mod product;
