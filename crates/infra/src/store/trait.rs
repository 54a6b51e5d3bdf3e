use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use stockflow_inventory::{Product, ProductId, StockMovement};
use stockflow_orders::{Order, OrderId, OrderItem, OrderNumber, SequenceSource};

/// Store operation error.
///
/// Infrastructure failures, as opposed to domain errors. `Concurrency` and
/// `LockTimeout` are transient: the same operation re-run from scratch may
/// succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic version check failed at commit.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A keyed lock could not be acquired within the wait budget.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// A unique key (SKU, order number) is already taken.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Concurrency(_) | StoreError::LockTimeout(_))
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Store-wide, strictly increasing commit position.
    pub sequence: u64,
}

/// One atomic unit of work.
///
/// `*_for_update` reads take the aggregate's lock for the rest of the
/// transaction and return the latest state, including writes staged earlier
/// in the same transaction. Writes are only visible to other readers after
/// [`Transaction::commit`].
pub trait Transaction {
    fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Items of an order, sorted by product id. Locks the order.
    fn items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// Stage a new product. Fails at commit if the id or SKU is taken.
    fn insert_product(&mut self, product: Product) -> Result<(), StoreError>;

    /// Stage a new order. Fails at commit if the id or number is taken.
    fn insert_order(&mut self, order: Order) -> Result<(), StoreError>;

    fn save_product(&mut self, product: Product) -> Result<(), StoreError>;

    fn save_order(&mut self, order: Order) -> Result<(), StoreError>;

    fn save_item(&mut self, item: OrderItem) -> Result<(), StoreError>;

    fn delete_item(&mut self, order_id: OrderId, product_id: ProductId) -> Result<(), StoreError>;

    fn append_movement(&mut self, movement: StockMovement) -> Result<(), StoreError>;

    /// Apply every staged write atomically.
    fn commit(self: Box<Self>) -> Result<CommitReceipt, StoreError>;
}

/// Storage backend used by the coordinator.
///
/// Plain reads return committed state only and never block on keyed locks.
pub trait Store: SequenceSource + Send + Sync {
    /// Open a transaction. Each keyed lock wait is bounded by `lock_wait`.
    fn begin(&self, lock_wait: Duration) -> Result<Box<dyn Transaction + '_>, StoreError>;

    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError>;

    fn products(&self) -> Result<Vec<Product>, StoreError>;

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// Ledger entries of a product in commit order.
    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn begin(&self, lock_wait: Duration) -> Result<Box<dyn Transaction + '_>, StoreError> {
        (**self).begin(lock_wait)
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(id)
    }

    fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        (**self).product_by_sku(sku)
    }

    fn products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).products()
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).order(id)
    }

    fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        (**self).order_by_number(number)
    }

    fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        (**self).order_items(order_id)
    }

    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements(product_id)
    }
}
