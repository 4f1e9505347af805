//! Shared fixtures for the engine's unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use ledger_core::{Clock, CounterpartyKind, FixedClock, NewDepositType, NewProduct, Product};
use ledger_db::{Database, DbConfig, DbTx};

use crate::config::{LedgerConfig, RetrySettings};
use crate::coordinator::TransactionCoordinator;
use crate::engine::LedgerEngine;
use crate::lifecycle::DepositLifecycle;
use crate::registry::DepositTypeRegistry;
use crate::stock::StockLedger;
use crate::valuation::ValuationProjection;

/// 2026-01-31 10:00 UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap()
}

/// cost 800, price 1200, min 5.
pub fn product_input(sku: &str) -> NewProduct {
    NewProduct {
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        min_stock: 5,
        cost_cents: 800,
        price_cents: 1200,
    }
}

/// Engine over a fresh in-memory database and a fixed clock.
pub async fn engine() -> (LedgerEngine, Arc<FixedClock>) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let clock = Arc::new(FixedClock::new(test_now()));
    let engine = LedgerEngine::new(db, clock.clone() as Arc<dyn Clock>, LedgerConfig::in_memory());
    (engine, clock)
}

/// Engine over a throwaway database file with a real connection pool, so
/// concurrent units of work overlap instead of queueing on one connection.
/// The files are removed on drop.
pub struct FileLedger {
    pub engine: Arc<LedgerEngine>,
    path: PathBuf,
}

impl FileLedger {
    pub async fn new() -> Self {
        let path = std::env::temp_dir().join(format!("ledger-test-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(8)).await.unwrap();

        let mut config = LedgerConfig::in_memory();
        config.database.path = path.clone();
        config.database.max_connections = 8;
        config.retry = RetrySettings {
            max_attempts: 25,
            initial_backoff_ms: 2,
            max_backoff_ms: 20,
        };

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(test_now()));
        FileLedger {
            engine: Arc::new(LedgerEngine::new(db, clock, config)),
            path,
        }
    }
}

impl Drop for FileLedger {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Components wired the way the engine wires them, for tests that drive a
/// single transaction by hand.
pub struct TestLedger {
    pub db: Database,
    pub clock: Arc<FixedClock>,
    pub stock: StockLedger,
    pub registry: DepositTypeRegistry,
    pub lifecycle: DepositLifecycle,
    pub coordinator: TransactionCoordinator,
    pub valuation: ValuationProjection,
}

impl TestLedger {
    pub async fn new() -> Self {
        let (engine, clock) = engine().await;
        TestLedger {
            db: engine.database().clone(),
            clock,
            stock: engine.stock().clone(),
            registry: engine.registry().clone(),
            lifecycle: engine.lifecycle().clone(),
            coordinator: engine.coordinator().clone(),
            valuation: engine.valuation_projection().clone(),
        }
    }

    pub async fn product(&self, tx: &mut DbTx, sku: &str, stock: i64) -> Product {
        self.stock
            .register_product(tx, &product_input(sku), stock, "test")
            .await
            .unwrap()
    }

    /// Active type with a 500 cent deposit.
    pub async fn deposit_type(&self, tx: &mut DbTx, name: &str) -> String {
        let input = NewDepositType {
            name: name.to_string(),
            amount_cents: 500,
        };
        self.registry.create(tx, &input).await.unwrap().id
    }

    pub async fn customer(&self, tx: &mut DbTx, name: &str) -> String {
        self.coordinator
            .register_party(tx, CounterpartyKind::Customer, name)
            .await
            .unwrap()
            .id
    }

    pub async fn supplier(&self, tx: &mut DbTx, name: &str) -> String {
        self.coordinator
            .register_party(tx, CounterpartyKind::Supplier, name)
            .await
            .unwrap()
            .id
    }
}
