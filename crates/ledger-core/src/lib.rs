//! # ledger-core: Pure Domain Logic for the Stock Ledger
//!
//! This crate is the **heart** of the stock ledger. It contains the rules that
//! keep product quantities and returnable-packaging deposits consistent, as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stock Ledger Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              API layer (outside this workspace)                 │   │
//! │  │     submit_sale, receive_purchase, record_return, reports       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ledger-engine (transaction boundaries)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ledger-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐  │   │
//! │  │   │  types  │ │  stock  │ │ deposit │ │reference │ │ clock  │  │   │
//! │  │   │ Product │ │ next_   │ │ state   │ │ DIN-/    │ │ Clock  │  │   │
//! │  │   │ Deposit │ │ stock   │ │ machine │ │ DOUT-    │ │ trait  │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └──────────┘ └────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ledger-db (Database Layer)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, StockMovement, Deposit, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - The ledger error taxonomy
//! - [`validation`] - Input validation
//! - [`stock`] - Movement arithmetic and stock flags
//! - [`deposit`] - Deposit state machine
//! - [`reference`] - Reference and document number factories
//! - [`clock`] - Injected time source
//!
//! ## Example Usage
//!
//! ```rust
//! use ledger_core::money::Money;
//!
//! // Deposit refunds are always quantity × unit amount, in cents
//! let unit = Money::from_cents(500);
//! assert_eq!((unit * 4_i64).cents(), 2000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod deposit;
pub mod error;
pub mod money;
pub mod reference;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ErrorKind, LedgerError, LedgerResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity a single movement or deposit may carry.
///
/// Guards against keying mistakes (an extra zero on a pallet count) without
/// restricting realistic back-office volumes.
pub const MAX_MOVEMENT_QUANTITY: i64 = 1_000_000;

/// Maximum line items in a single sale, purchase or adjustment.
pub const MAX_DOCUMENT_LINES: usize = 100;

/// Reason recorded on the movement that books a product's opening stock.
pub const INITIAL_STOCK_REASON: &str = "initial stock";
