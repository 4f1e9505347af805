//! # Transaction Coordinator
//!
//! Sales, purchase receipts and manual adjustments. Each is one document
//! whose movements, deposits and balance change all land in the caller's
//! transaction, or none of them do.
//!
//! ## Two Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  submit_sale(lines)                                                     │
//! │                                                                         │
//! │  PHASE 1: validate (reads only)                                        │
//! │    every line: quantity, price, product exists and is active           │
//! │    per product: Σ quantity <= stock          → InsufficientStock       │
//! │    per type:    Σ packaging <= on hand       → InsufficientDepositStock│
//! │                                                                         │
//! │  PHASE 2: write                                                         │
//! │    documents      SAL-20260131-4KQ9ZP                                  │
//! │    per line:      out movement (reference = number)                    │
//! │                   outgoing deposit (source_reference = number)         │
//! │                   document_lines row                                   │
//! │    credit terms:  customer balance += total                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! A failure in phase 2 (a lost version race, say) still leaves nothing
//! behind: the engine drops the transaction without committing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use ledger_core::reference::{document_number, random_suffix};
use ledger_core::stock::count_delta;
use ledger_core::validation::{
    validate_actor_id, validate_amount_cents, validate_counted, validate_line_count,
    validate_party_name, validate_quantity, validate_reason,
};
use ledger_core::{
    Clock, Counterparty, CounterpartyKind, Deposit, DepositDirection, DepositType, Document,
    DocumentKind, DocumentLine, LedgerError, LedgerResult, MovementDirection, NewDeposit, Party,
    PaymentTerms, Product, StockMovement, ValidationError,
};
use ledger_db::{DbTx, DocumentRepository, PartyRepository, ProductRepository};

use crate::lifecycle::DepositLifecycle;
use crate::registry::{self, DepositTypeRegistry};
use crate::stock::{self, StockChange, StockLedger};

/// Movement reason on sale lines.
pub const SALE_REASON: &str = "sale";
/// Movement reason on purchase lines.
pub const PURCHASE_REASON: &str = "purchase";

// =============================================================================
// Requests
// =============================================================================

/// Returnable packaging that travels with a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packaging {
    pub deposit_type_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: i64,
    /// Overrides the product's list price.
    pub unit_price_cents: Option<i64>,
    pub packaging: Option<Packaging>,
}

/// A sale. A customer is required for credit terms and for consigned
/// packaging; cash sales without packaging may be anonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRequest {
    pub customer_id: Option<String>,
    pub terms: PaymentTerms,
    pub lines: Vec<SaleLine>,
    pub actor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,
    pub packaging: Option<Packaging>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub supplier_id: String,
    pub terms: PaymentTerms,
    pub lines: Vec<PurchaseLine>,
    pub actor_id: String,
}

/// One line of a manual adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdjustmentLine {
    /// Explicit change in one direction.
    Delta {
        product_id: String,
        direction: MovementDirection,
        quantity: i64,
    },
    /// Physical count; the difference to current stock is booked.
    Count { product_id: String, counted: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub reason: String,
    pub actor_id: String,
    pub lines: Vec<AdjustmentLine>,
}

/// Everything a document wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReceipt {
    pub document: Document,
    pub lines: Vec<DocumentLine>,
    pub movements: Vec<StockMovement>,
    pub deposits: Vec<Deposit>,
}

// =============================================================================
// Phase 1 helpers
// =============================================================================

/// Per-product stock as the document would leave it.
struct StockProjection {
    products: HashMap<String, (Product, i64)>,
}

impl StockProjection {
    fn new() -> Self {
        StockProjection {
            products: HashMap::new(),
        }
    }

    async fn load(&mut self, tx: &mut DbTx, repo: &ProductRepository, product_id: &str) -> LedgerResult<&Product> {
        if !self.products.contains_key(product_id) {
            let product = repo.require(tx, product_id).await?;
            stock::ensure_active(&product)?;
            let current = product.current_stock;
            self.products.insert(product_id.to_string(), (product, current));
        }

        self.products
            .get(product_id)
            .map(|(product, _)| product)
            .ok_or_else(|| LedgerError::not_found("Product", product_id))
    }

    fn projected(&self, product_id: &str) -> i64 {
        self.products.get(product_id).map(|(_, p)| *p).unwrap_or(0)
    }

    /// Applies a movement to the projection. Shortfalls report the stock at
    /// the start of the document and the total requested so far.
    fn apply(&mut self, product_id: &str, direction: MovementDirection, quantity: i64) -> LedgerResult<()> {
        let (product, projected) = self
            .products
            .get_mut(product_id)
            .ok_or_else(|| LedgerError::not_found("Product", product_id))?;

        match direction {
            MovementDirection::In => *projected += quantity,
            MovementDirection::Out if quantity > *projected => {
                return Err(LedgerError::InsufficientStock {
                    product_id: product_id.to_string(),
                    available: product.current_stock,
                    requested: product.current_stock - *projected + quantity,
                });
            }
            MovementDirection::Out => *projected -= quantity,
        }
        Ok(())
    }
}

/// Packaging demand per deposit type.
struct PackagingDemand {
    types: Vec<(DepositType, i64)>,
}

impl PackagingDemand {
    fn new() -> Self {
        PackagingDemand { types: Vec::new() }
    }

    async fn add(&mut self, tx: &mut DbTx, registry: &DepositTypeRegistry, packaging: &Packaging) -> LedgerResult<i64> {
        validate_quantity(packaging.quantity)?;

        if let Some(entry) = self
            .types
            .iter_mut()
            .find(|(t, _)| t.id == packaging.deposit_type_id)
        {
            entry.1 += packaging.quantity;
            return Ok(entry.0.amount_cents);
        }

        let deposit_type = registry.get(tx, &packaging.deposit_type_id).await?;
        registry::ensure_active(&deposit_type)?;
        let amount = deposit_type.amount_cents;
        self.types.push((deposit_type, packaging.quantity));
        Ok(amount)
    }

    /// Outgoing packaging must be on hand, aggregated per type.
    async fn ensure_available(&self, tx: &mut DbTx, registry: &DepositTypeRegistry) -> LedgerResult<()> {
        for (deposit_type, requested) in &self.types {
            let available = registry.quantity_in_stock(tx, &deposit_type.id).await?;
            if *requested > available {
                return Err(LedgerError::InsufficientDepositStock {
                    deposit_type_id: deposit_type.id.clone(),
                    available,
                    requested: *requested,
                });
            }
        }
        Ok(())
    }
}

/// A line that passed phase 1.
struct PlannedLine {
    product_id: String,
    direction: MovementDirection,
    quantity: i64,
    unit_amount_cents: i64,
    packaging: Option<(Packaging, i64)>,
}

impl PlannedLine {
    fn goods_total(&self) -> i64 {
        self.quantity * self.unit_amount_cents
    }

    fn packaging_total(&self) -> i64 {
        self.packaging
            .as_ref()
            .map(|(p, unit)| p.quantity * unit)
            .unwrap_or(0)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Clone)]
pub struct TransactionCoordinator {
    clock: Arc<dyn Clock>,
    stock: StockLedger,
    registry: DepositTypeRegistry,
    lifecycle: DepositLifecycle,
    products: ProductRepository,
    parties: PartyRepository,
    documents: DocumentRepository,
    reference_attempts: u32,
}

impl TransactionCoordinator {
    pub fn new(
        clock: Arc<dyn Clock>,
        stock: StockLedger,
        registry: DepositTypeRegistry,
        lifecycle: DepositLifecycle,
        reference_attempts: u32,
    ) -> Self {
        TransactionCoordinator {
            clock,
            stock,
            registry,
            lifecycle,
            products: ProductRepository,
            parties: PartyRepository,
            documents: DocumentRepository,
            reference_attempts,
        }
    }

    /// Books a sale.
    ///
    /// ## Errors
    /// - `Validation` for bad lines, a missing customer where one is
    ///   required, or inactive products/types
    /// - `NotFound` for unknown products, types or customer
    /// - `InsufficientStock` / `InsufficientDepositStock`, aggregated over
    ///   all lines
    pub async fn submit_sale(&self, tx: &mut DbTx, request: &SaleRequest) -> LedgerResult<DocumentReceipt> {
        validate_line_count(request.lines.len())?;
        validate_actor_id(&request.actor_id)?;

        let needs_customer = request.terms == PaymentTerms::Credit
            || request.lines.iter().any(|l| l.packaging.is_some());
        let counterparty = match &request.customer_id {
            Some(id) => Some(self.require_party(tx, CounterpartyKind::Customer, id).await?),
            None if needs_customer => {
                return Err(ValidationError::Required {
                    field: "customer".to_string(),
                }
                .into())
            }
            None => None,
        };

        let mut projection = StockProjection::new();
        let mut demand = PackagingDemand::new();
        let mut planned = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            validate_quantity(line.quantity)?;
            if let Some(price) = line.unit_price_cents {
                validate_amount_cents("unit price", price)?;
            }

            let product = projection.load(tx, &self.products, &line.product_id).await?;
            let unit_price = line.unit_price_cents.unwrap_or(product.price_cents);
            projection.apply(&line.product_id, MovementDirection::Out, line.quantity)?;

            let packaging = match &line.packaging {
                Some(p) => Some((p.clone(), demand.add(tx, &self.registry, p).await?)),
                None => None,
            };

            planned.push(PlannedLine {
                product_id: line.product_id.clone(),
                direction: MovementDirection::Out,
                quantity: line.quantity,
                unit_amount_cents: unit_price,
                packaging,
            });
        }
        demand.ensure_available(tx, &self.registry).await?;

        let receipt = self
            .write_document(
                tx,
                DocumentKind::Sale,
                counterparty,
                request.terms,
                None,
                &request.actor_id,
                SALE_REASON,
                planned,
            )
            .await?;

        info!(
            number = %receipt.document.number,
            lines = receipt.lines.len(),
            total_cents = receipt.document.total_cents,
            "Sale submitted"
        );
        Ok(receipt)
    }

    /// Books a purchase receipt.
    pub async fn receive_purchase(&self, tx: &mut DbTx, request: &PurchaseRequest) -> LedgerResult<DocumentReceipt> {
        validate_line_count(request.lines.len())?;
        validate_actor_id(&request.actor_id)?;

        let supplier = self
            .require_party(tx, CounterpartyKind::Supplier, &request.supplier_id)
            .await?;

        let mut projection = StockProjection::new();
        let mut demand = PackagingDemand::new();
        let mut planned = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            validate_quantity(line.quantity)?;
            validate_amount_cents("unit cost", line.unit_cost_cents)?;

            projection.load(tx, &self.products, &line.product_id).await?;
            projection.apply(&line.product_id, MovementDirection::In, line.quantity)?;

            let packaging = match &line.packaging {
                Some(p) => Some((p.clone(), demand.add(tx, &self.registry, p).await?)),
                None => None,
            };

            planned.push(PlannedLine {
                product_id: line.product_id.clone(),
                direction: MovementDirection::In,
                quantity: line.quantity,
                unit_amount_cents: line.unit_cost_cents,
                packaging,
            });
        }

        let receipt = self
            .write_document(
                tx,
                DocumentKind::Purchase,
                Some(supplier),
                request.terms,
                None,
                &request.actor_id,
                PURCHASE_REASON,
                planned,
            )
            .await?;

        info!(
            number = %receipt.document.number,
            lines = receipt.lines.len(),
            total_cents = receipt.document.total_cents,
            "Purchase received"
        );
        Ok(receipt)
    }

    /// Books a manual adjustment. Count lines that match current stock book
    /// nothing; the document header is still written.
    pub async fn adjust_stock(&self, tx: &mut DbTx, request: &AdjustmentRequest) -> LedgerResult<DocumentReceipt> {
        validate_line_count(request.lines.len())?;
        validate_reason(&request.reason)?;
        validate_actor_id(&request.actor_id)?;

        let mut projection = StockProjection::new();
        let mut planned = Vec::with_capacity(request.lines.len());

        for line in &request.lines {
            let (product_id, delta) = match line {
                AdjustmentLine::Delta {
                    product_id,
                    direction,
                    quantity,
                } => {
                    validate_quantity(*quantity)?;
                    (product_id, Some((*direction, *quantity)))
                }
                AdjustmentLine::Count { product_id, counted } => {
                    validate_counted(*counted)?;
                    projection.load(tx, &self.products, product_id).await?;
                    (product_id, count_delta(projection.projected(product_id), *counted))
                }
            };

            projection.load(tx, &self.products, product_id).await?;
            let Some((direction, quantity)) = delta else {
                debug!(product_id = %product_id, "Count matches stock, nothing to book");
                continue;
            };
            projection.apply(product_id, direction, quantity)?;

            planned.push(PlannedLine {
                product_id: product_id.clone(),
                direction,
                quantity,
                unit_amount_cents: 0,
                packaging: None,
            });
        }

        let reason = request.reason.trim().to_string();
        let receipt = self
            .write_document(
                tx,
                DocumentKind::Adjustment,
                None,
                PaymentTerms::Cash,
                Some(reason.clone()),
                &request.actor_id,
                &reason,
                planned,
            )
            .await?;

        info!(
            number = %receipt.document.number,
            movements = receipt.movements.len(),
            "Stock adjusted"
        );
        Ok(receipt)
    }

    // =========================================================================
    // Phase 2
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn write_document(
        &self,
        tx: &mut DbTx,
        kind: DocumentKind,
        counterparty: Option<Counterparty>,
        terms: PaymentTerms,
        reason: Option<String>,
        actor_id: &str,
        movement_reason: &str,
        planned: Vec<PlannedLine>,
    ) -> LedgerResult<DocumentReceipt> {
        let total_cents: i64 = planned
            .iter()
            .map(|l| l.goods_total() + l.packaging_total())
            .sum();

        let document = Document {
            id: Uuid::new_v4().to_string(),
            number: self.next_document_number(tx, kind).await?,
            kind,
            counterparty: counterparty.clone(),
            terms,
            total_cents,
            reason,
            actor_id: actor_id.to_string(),
            created_at: self.clock.now(),
        };
        self.documents.insert(tx, &document).await?;

        let mut lines = Vec::with_capacity(planned.len());
        let mut movements = Vec::with_capacity(planned.len());
        let mut deposits = Vec::new();

        for line in planned {
            let change = StockChange::new(&line.product_id, line.quantity, movement_reason, actor_id)
                .with_reference(&document.number);
            movements.push(self.stock.apply(tx, line.direction, &change).await?);

            let deposit_id = match (&line.packaging, &counterparty) {
                (Some((packaging, unit_amount)), Some(party)) => {
                    let direction = match kind {
                        DocumentKind::Purchase => DepositDirection::Incoming,
                        _ => DepositDirection::Outgoing,
                    };
                    let opened = self
                        .lifecycle
                        .create_deposit(
                            tx,
                            NewDeposit {
                                direction,
                                deposit_type_id: packaging.deposit_type_id.clone(),
                                counterparty: party.clone(),
                                quantity: packaging.quantity,
                                unit_amount_cents: *unit_amount,
                                source_reference: Some(document.number.clone()),
                                notes: None,
                            },
                        )
                        .await?;
                    let id = opened.id.clone();
                    deposits.push(opened);
                    Some(id)
                }
                _ => None,
            };

            let row = DocumentLine {
                id: Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                product_id: line.product_id.clone(),
                direction: line.direction,
                quantity: line.quantity,
                unit_amount_cents: line.unit_amount_cents,
                line_total_cents: line.goods_total(),
                deposit_id,
            };
            self.documents.insert_line(tx, &row).await?;
            lines.push(row);
        }

        if terms == PaymentTerms::Credit {
            if let Some(party) = &counterparty {
                self.parties
                    .adjust_balance(tx, party.kind(), party.id(), total_cents, document.created_at)
                    .await?;
                debug!(party = %party.id(), delta_cents = total_cents, "Balance adjusted");
            }
        }

        Ok(DocumentReceipt {
            document,
            lines,
            movements,
            deposits,
        })
    }

    /// Registers a customer or supplier with a zero balance.
    pub async fn register_party(&self, tx: &mut DbTx, kind: CounterpartyKind, name: &str) -> LedgerResult<Party> {
        validate_party_name(name)?;

        let now = self.clock.now();
        let party = Party {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            balance_cents: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.parties.insert(tx, kind, &party).await?;

        info!(kind = %kind, id = %party.id, name = %party.name, "Counterparty registered");
        Ok(party)
    }

    async fn require_party(&self, tx: &mut DbTx, kind: CounterpartyKind, id: &str) -> LedgerResult<Counterparty> {
        let party = self.parties.require(tx, kind, id).await?;
        if !party.is_active {
            return Err(ValidationError::Inactive {
                entity: kind.to_string(),
                id: id.to_string(),
            }
            .into());
        }
        Ok(Counterparty::from_parts(kind, party.id))
    }

    async fn next_document_number(&self, tx: &mut DbTx, kind: DocumentKind) -> LedgerResult<String> {
        let today = self.clock.today();

        for attempt in 1..=self.reference_attempts {
            let candidate = document_number(kind, today, &random_suffix());
            if !self.documents.number_exists(tx, &candidate).await? {
                return Ok(candidate);
            }
            debug!(number = %candidate, attempt, "Document number collision");
        }

        Err(LedgerError::Persistence(format!(
            "no free {} number after {} attempts",
            kind.prefix(),
            self.reference_attempts
        )))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
