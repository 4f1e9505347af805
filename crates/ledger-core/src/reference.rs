//! # Business References
//!
//! Human-readable identifiers printed on delivery notes and receipts.
//!
//! ```text
//! DOUT-20260131-7QX2KD     outgoing deposit
//! DIN-20260131-M3P0AA      incoming deposit
//! SAL-20260131-4KQ9ZP      sale document
//! PUR-20260131-...         purchase receipt
//! ADJ-20260131-...         manual adjustment
//!  │      │        │
//!  │      │        └── 6 uppercase alphanumerics, random
//!  │      └── creation date (UTC)
//!  └── prefix
//! ```
//!
//! Uniqueness is enforced by the store; the engine regenerates the suffix on
//! collision.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::types::{DepositDirection, DocumentKind};

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 6;

/// Prefix for a deposit reference.
pub const fn deposit_prefix(direction: DepositDirection) -> &'static str {
    match direction {
        DepositDirection::Incoming => "DIN",
        DepositDirection::Outgoing => "DOUT",
    }
}

/// Builds a deposit reference, e.g. `DOUT-20260131-7QX2KD`.
pub fn deposit_reference(direction: DepositDirection, date: NaiveDate, suffix: &str) -> String {
    format!("{}-{}-{}", deposit_prefix(direction), date.format("%Y%m%d"), suffix)
}

/// Builds a document number, e.g. `SAL-20260131-4KQ9ZP`.
pub fn document_number(kind: DocumentKind, date: NaiveDate, suffix: &str) -> String {
    format!("{}-{}-{}", kind.prefix(), date.format("%Y%m%d"), suffix)
}

/// Random uppercase suffix taken from a fresh UUID v4.
pub fn random_suffix() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan_31() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()
    }

    #[test]
    fn test_deposit_reference_format() {
        assert_eq!(
            deposit_reference(DepositDirection::Outgoing, jan_31(), "7QX2KD"),
            "DOUT-20260131-7QX2KD"
        );
        assert_eq!(
            deposit_reference(DepositDirection::Incoming, jan_31(), "M3P0AA"),
            "DIN-20260131-M3P0AA"
        );
    }

    #[test]
    fn test_document_number_format() {
        assert_eq!(
            document_number(DocumentKind::Adjustment, jan_31(), "ABC123"),
            "ADJ-20260131-ABC123"
        );
    }

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix();
        assert_eq!(s.len(), SUFFIX_LEN);
        assert!(s
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
