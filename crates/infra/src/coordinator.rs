//! Composite, externally callable operations.
//!
//! Every operation runs as one store transaction:
//!
//! ```text
//! begin
//!   ↓
//! 1. Lock + load (one order first, then products in ascending id order)
//!   ↓
//! 2. Decide (pure domain logic: ledger postings, item upserts, transitions)
//!   ↓
//! 3. Stage writes + collect events
//!   ↓
//! 4. Commit (version-checked, all or nothing)
//!   ↓
//! 5. Publish events to the bus
//! ```
//!
//! Transient store failures (lock-wait timeouts, version mismatches) restart
//! the whole attempt with backoff. Domain errors surface immediately.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use stockflow_core::DomainError;
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    InventoryEvent, LedgerBalance, LedgerPosting, MovementRecorded, NewProduct, Product, ProductId,
    RecordMovement, StockLedger, StockMovement,
};
use stockflow_orders::{
    NewOrder, Order, OrderAggregator, OrderEvent, OrderId, OrderItem, OrderNumber, OrderStatus,
    SequenceAllocator,
};

use crate::config::CoordinatorConfig;
use crate::outbox::Outbox;
use crate::store::{Store, StoreError, Transaction};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Business rule violation (deterministic, never retried).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Transient conflicts persisted through every retry.
    #[error("concurrency conflict persisted after {attempts} attempts: {last_error}")]
    ConcurrencyConflict { attempts: u32, last_error: String },

    /// The operation deadline passed; staged work was rolled back.
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl CoordinatorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::Store(e) if e.is_transient())
    }

    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            CoordinatorError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate(msg) => CoordinatorError::Domain(DomainError::conflict(msg)),
            other => CoordinatorError::Store(other),
        }
    }
}

/// Coordinates the ledger, numbering and order aggregation on top of a
/// [`Store`], publishing committed events to an [`EventBus`].
#[derive(Debug)]
pub struct ConsistencyCoordinator<S, B> {
    store: S,
    bus: B,
    config: CoordinatorConfig,
}

impl<S, B> ConsistencyCoordinator<S, B> {
    pub fn new(store: S, bus: B, config: CoordinatorConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> ConsistencyCoordinator<S, B>
where
    S: Store,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ----- products -------------------------------------------------------

    pub fn register_product(&self, input: NewProduct) -> Result<Product, CoordinatorError> {
        if self.store.product_by_sku(input.sku.trim())?.is_some() {
            return Err(DomainError::conflict(format!("sku {} already exists", input.sku.trim())).into());
        }
        let id = ProductId::generate();

        self.execute("register_product", |tx, outbox, now| {
            let product = Product::register(id, input.clone(), now)?;
            tx.insert_product(product.clone())?;
            outbox.record(&InventoryEvent::registered(&product));
            Ok(product)
        })
    }

    pub fn set_product_active(&self, product_id: ProductId, active: bool) -> Result<Product, CoordinatorError> {
        self.execute("set_product_active", |tx, _outbox, now| {
            let mut product = load_product(tx, product_id)?;
            if product.set_active(active, now) {
                tx.save_product(product.clone())?;
            }
            Ok(product)
        })
    }

    /// Post a direct ledger entry. A transfer yields two movements.
    pub fn record_movement(&self, cmd: RecordMovement) -> Result<Vec<StockMovement>, CoordinatorError> {
        self.execute("record_movement", |tx, outbox, now| {
            let product = load_product(tx, cmd.product_id)?;
            let posting = StockLedger::post(&product, &cmd, now)?;
            let movements = posting.movements.clone();
            stage_posting(tx, outbox, posting)?;
            Ok(movements)
        })
    }

    // ----- orders ---------------------------------------------------------

    /// Allocate a number and open a pending order.
    pub fn create_order(&self, input: NewOrder) -> Result<Order, CoordinatorError> {
        input.validate()?;
        let number = SequenceAllocator::new(&self.store, self.config.sequence_attempts)
            .next(input.order_type)?;
        let id = OrderId::generate();

        self.execute("create_order", |tx, outbox, now| {
            let order = Order::open(id, number.clone(), input.clone(), now)?;
            tx.insert_order(order.clone())?;
            outbox.record(&OrderEvent::created(&order));
            Ok(order)
        })
    }

    /// Create or replace the item for `(order, product)`, recompute the total,
    /// and post any stock-out the fulfillment cascade calls for.
    pub fn record_sale(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: u64,
    ) -> Result<OrderItem, CoordinatorError> {
        self.execute("record_sale", |tx, outbox, now| {
            let order = load_order(tx, order_id)?;
            let items = tx.items(order_id)?;
            let product = load_product(tx, product_id)?;

            let change = OrderAggregator::upsert_item(&order, &items, &product, quantity, unit_price, now)?;
            if let Some(out) = &change.stock_out {
                let posting = StockLedger::stock_out(
                    &product,
                    out.quantity,
                    out.reference.clone(),
                    out.actor,
                    self.config.fulfillment_backorder,
                    now,
                )?;
                stage_posting(tx, outbox, posting)?;
            }

            tx.save_item(change.item.clone())?;
            tx.save_order(change.order.clone())?;
            outbox.record(&OrderEvent::item_upserted(&change.order, &change.item));
            Ok(change.item)
        })
    }

    /// Remove an item that has not been fulfilled yet.
    pub fn remove_item(&self, order_id: OrderId, product_id: ProductId) -> Result<Order, CoordinatorError> {
        self.execute("remove_item", |tx, outbox, now| {
            let order = load_order(tx, order_id)?;
            let items = tx.items(order_id)?;

            let change = OrderAggregator::remove_item(&order, &items, product_id, now)?;
            tx.delete_item(order_id, product_id)?;
            tx.save_order(change.order.clone())?;
            outbox.record(&OrderEvent::item_removed(&change.order, product_id));
            Ok(change.order)
        })
    }

    /// Move an order along the status table, fulfilling sale items when the
    /// new status calls for it.
    pub fn transition_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order, CoordinatorError> {
        self.execute("transition_status", |tx, outbox, now| {
            let order = load_order(tx, order_id)?;
            let items = tx.items(order_id)?;

            let change = OrderAggregator::transition(&order, &items, new_status, now)?;
            // Stock-outs come back sorted by product id, which is also the lock order.
            for out in &change.stock_outs {
                let product = load_product(tx, out.product_id)?;
                let posting = StockLedger::stock_out(
                    &product,
                    out.quantity,
                    out.reference.clone(),
                    out.actor,
                    self.config.fulfillment_backorder,
                    now,
                )?;
                stage_posting(tx, outbox, posting)?;
            }
            for item in &change.items {
                tx.save_item(item.clone())?;
            }

            tx.save_order(change.order.clone())?;
            outbox.record(&OrderEvent::status_changed(&change.order, change.previous));
            Ok(change.order)
        })
    }

    // ----- queries --------------------------------------------------------

    pub fn product(&self, id: ProductId) -> Result<Option<Product>, CoordinatorError> {
        Ok(self.store.product(id)?)
    }

    pub fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, CoordinatorError> {
        Ok(self.store.product_by_sku(sku.trim())?)
    }

    pub fn order(&self, id: OrderId) -> Result<Option<Order>, CoordinatorError> {
        Ok(self.store.order(id)?)
    }

    pub fn order_by_number(&self, number: &str) -> Result<Option<Order>, CoordinatorError> {
        let number: OrderNumber = number.parse()?;
        Ok(self.store.order_by_number(&number)?)
    }

    pub fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, CoordinatorError> {
        Ok(self.store.order_items(order_id)?)
    }

    pub fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, CoordinatorError> {
        Ok(self.store.movements(product_id)?)
    }

    /// Active products at or below their minimum level, by SKU.
    pub fn low_stock_products(&self) -> Result<Vec<Product>, CoordinatorError> {
        Ok(self
            .store
            .products()?
            .into_iter()
            .filter(|p| p.is_active() && p.is_low_stock())
            .collect())
    }

    /// Replay a product's ledger under its lock and compare with the stored
    /// quantities.
    pub fn verify_product(&self, product_id: ProductId) -> Result<LedgerBalance, CoordinatorError> {
        let mut tx = self.store.begin(self.config.lock_wait)?;
        let product = load_product(tx.as_mut(), product_id)?;
        let movements = self.store.movements(product_id)?;
        let balance = StockLedger::verify(&product, &movements)?;
        drop(tx);
        Ok(balance)
    }

    // ----- execution ------------------------------------------------------

    fn execute<T, F>(&self, operation: &'static str, mut body: F) -> Result<T, CoordinatorError>
    where
        F: FnMut(&mut dyn Transaction, &mut Outbox, DateTime<Utc>) -> Result<T, CoordinatorError>,
    {
        let span = info_span!("coordinator", operation);
        let _entered = span.enter();

        let started = Instant::now();
        let deadline = started + self.config.operation_timeout;
        let timeout = || CoordinatorError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let mut retries = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(retries, "deadline passed before attempt");
                return Err(timeout());
            }
            debug!(attempt = retries + 1, "starting attempt");

            let err = match self.attempt(self.config.lock_wait.min(remaining), deadline, &mut body) {
                Ok((value, outbox, sequence)) => {
                    info!(commit_sequence = sequence, events = outbox.len(), "committed");
                    self.publish(outbox, sequence);
                    return Ok(value);
                }
                Err(AttemptError::DeadlinePassed) => {
                    warn!(retries, "deadline passed before commit; rolled back");
                    return Err(timeout());
                }
                Err(AttemptError::Failed(err)) if err.is_transient() => err,
                Err(AttemptError::Failed(err)) => return Err(err),
            };

            if !self.config.retry.should_retry(retries) {
                warn!(attempts = retries + 1, error = %err, "retries exhausted");
                return Err(CoordinatorError::ConcurrencyConflict {
                    attempts: retries + 1,
                    last_error: err.to_string(),
                });
            }
            retries += 1;

            let delay = self.config.retry.delay_for_retry(retries);
            if Instant::now() + delay >= deadline {
                warn!(retries, error = %err, "no time left to retry");
                return Err(timeout());
            }
            warn!(retry = retries, delay_ms = delay.as_millis() as u64, error = %err, "transient conflict; retrying");
            std::thread::sleep(delay);
        }
    }

    fn attempt<T, F>(
        &self,
        lock_wait: std::time::Duration,
        deadline: Instant,
        body: &mut F,
    ) -> Result<(T, Outbox, u64), AttemptError>
    where
        F: FnMut(&mut dyn Transaction, &mut Outbox, DateTime<Utc>) -> Result<T, CoordinatorError>,
    {
        let mut tx = self.store.begin(lock_wait).map_err(CoordinatorError::from)?;
        let mut outbox = Outbox::new();
        let value = body(tx.as_mut(), &mut outbox, Utc::now())?;

        if Instant::now() >= deadline {
            // Dropping `tx` discards every staged write and releases its locks.
            return Err(AttemptError::DeadlinePassed);
        }
        let receipt = tx.commit().map_err(CoordinatorError::from)?;
        Ok((value, outbox, receipt.sequence))
    }

    fn publish(&self, outbox: Outbox, commit_sequence: u64) {
        for envelope in outbox.into_envelopes(commit_sequence) {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = self.bus.publish(envelope) {
                warn!(event_type = %event_type, commit_sequence, error = ?err, "event publication failed");
            }
        }
    }
}

enum AttemptError {
    Failed(CoordinatorError),
    DeadlinePassed,
}

impl From<CoordinatorError> for AttemptError {
    fn from(value: CoordinatorError) -> Self {
        AttemptError::Failed(value)
    }
}

fn load_product(tx: &mut dyn Transaction, id: ProductId) -> Result<Product, CoordinatorError> {
    tx.product_for_update(id)?
        .ok_or_else(|| DomainError::not_found(format!("product {id}")).into())
}

fn load_order(tx: &mut dyn Transaction, id: OrderId) -> Result<Order, CoordinatorError> {
    tx.order_for_update(id)?
        .ok_or_else(|| DomainError::not_found(format!("order {id}")).into())
}

/// Stage a ledger posting: the product's new quantities, its movements, and
/// the matching events.
fn stage_posting(
    tx: &mut dyn Transaction,
    outbox: &mut Outbox,
    posting: LedgerPosting,
) -> Result<(), CoordinatorError> {
    let LedgerPosting {
        product,
        movements,
        crossed_low_stock,
    } = posting;

    for movement in movements {
        outbox.record(&InventoryEvent::MovementRecorded(MovementRecorded {
            movement: movement.clone(),
            quantity_on_hand: product.quantity_on_hand(),
        }));
        tx.append_movement(movement)?;
    }
    if crossed_low_stock {
        outbox.record(&InventoryEvent::low_stock(&product));
    }
    tx.save_product(product)?;
    Ok(())
}
