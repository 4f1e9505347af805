//! # Seed Data Generator
//!
//! Populates a development database with beverage products, returnable
//! packaging types and a handful of customers and suppliers.
//!
//! ## Usage
//! ```bash
//! # Generate 200 products (default)
//! cargo run -p ledger-db --bin seed
//!
//! # Generate custom amount into a specific file
//! cargo run -p ledger-db --bin seed -- --count 1000 --db ./data/ledger.db
//! ```
//!
//! Opening stock is booked as an `initial stock` movement in the same
//! transaction as the product row, so the seeded ledger reconciles.

use chrono::Utc;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ledger_core::{
    CounterpartyKind, DepositType, MovementDirection, Party, Product, StockMovement,
    INITIAL_STOCK_REASON,
};
use ledger_db::{Database, DbConfig};

/// Product families and the packaging they ship in.
const FAMILIES: &[(&str, &[&str])] = &[
    (
        "BEER",
        &[
            "Pilsner", "Lager", "Witbier", "Tripel", "Dubbel", "IPA", "Stout", "Bock",
        ],
    ),
    (
        "SODA",
        &["Cola", "Lemon", "Orange", "Tonic", "Ginger Ale", "Cassis"],
    ),
    (
        "WATR",
        &["Still Water", "Sparkling Water", "Mineral Water"],
    ),
    ("JUIC", &["Apple Juice", "Orange Juice", "Tomato Juice"]),
];

/// Pack sizes with a price add-on in cents.
const PACKS: &[(&str, i64)] = &[
    ("24x30cl crate", 900),
    ("12x50cl crate", 700),
    ("6-pack", 0),
    ("20L keg", 4500),
];

/// Returnable packaging with its per-unit deposit in cents.
const DEPOSIT_TYPES: &[(&str, i64)] = &[
    ("Crate 24x30cl", 390),
    ("Crate 12x50cl", 300),
    ("Keg 20L", 3000),
    ("Glass bottle", 10),
];

const CUSTOMERS: &[&str] = &["Cafe De Hoek", "Bar Centraal", "Hotel Zuid", "Sportkantine"];
const SUPPLIERS: &[&str] = &["Brouwerij Noord", "Frisdrank Groothandel"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ledger=debug,sqlx=warn")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./ledger_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stock Ledger Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./ledger_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, count, "Seeding stock ledger");

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let mut tx = db.begin().await?;

    if !db.products().list_active(&mut tx).await?.is_empty() {
        warn!("Database already has products, skipping seed. Delete the file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();
    let start = std::time::Instant::now();

    for (name, amount_cents) in DEPOSIT_TYPES {
        db.deposit_types()
            .insert(
                &mut tx,
                &DepositType {
                    id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    amount_cents: *amount_cents,
                    is_active: true,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await?;
    }

    for (kind, names) in [
        (CounterpartyKind::Customer, CUSTOMERS),
        (CounterpartyKind::Supplier, SUPPLIERS),
    ] {
        for name in names {
            let party = Party {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                balance_cents: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            db.parties().insert(&mut tx, kind, &party).await?;
        }
    }

    let mut generated = 0;
    'outer: for (family_idx, (family, names)) in FAMILIES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (pack_idx, (pack, price_addon)) in PACKS.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let seed = family_idx * 1000 + name_idx * 20 + pack_idx;
                let product = generate_product(family, name, pack, *price_addon, seed);
                let opening = product.current_stock;

                db.products().insert(&mut tx, &product).await?;

                if opening > 0 {
                    let movement = StockMovement {
                        seq: 0,
                        id: Uuid::new_v4().to_string(),
                        product_id: product.id.clone(),
                        direction: MovementDirection::In,
                        quantity: opening,
                        previous_stock: 0,
                        new_stock: opening,
                        reason: INITIAL_STOCK_REASON.to_string(),
                        reference: None,
                        actor_id: "seed".to_string(),
                        created_at: now,
                    };
                    db.movements().append(&mut tx, &movement).await?;
                }

                generated += 1;
            }
        }
    }

    tx.commit().await?;

    info!(
        products = generated,
        deposit_types = DEPOSIT_TYPES.len(),
        elapsed = ?start.elapsed(),
        "Seed complete"
    );

    Ok(())
}

/// Generates a single product with deterministic pseudo-random figures.
fn generate_product(family: &str, name: &str, pack: &str, price_addon: i64, seed: usize) -> Product {
    let now = Utc::now();

    let sku = format!(
        "{}-{}-{:03}",
        family,
        name.replace(' ', "").chars().take(3).collect::<String>().to_uppercase(),
        seed
    );

    // base $2.99 - $10.98 plus the pack add-on
    let price_cents = 299 + ((seed * 17) % 800) as i64 + price_addon;
    let cost_cents = price_cents * (60 + (seed % 20) as i64) / 100;

    Product {
        id: Uuid::new_v4().to_string(),
        sku,
        name: format!("{name} {pack}"),
        current_stock: (seed % 101) as i64,
        min_stock: 5 + (seed % 10) as i64,
        cost_cents,
        price_cents,
        is_active: true,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}
