use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use stockflow_core::{AggregateRoot, ExpectedVersion};
use stockflow_inventory::{Product, ProductId, StockMovement};
use stockflow_orders::{Order, OrderId, OrderItem, OrderNumber, OrderType, SequenceError, SequenceSource};

use super::locks::{LockKey, LockManager};
use super::r#trait::{CommitReceipt, Store, StoreError, Transaction};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    skus: HashMap<String, ProductId>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<OrderNumber, OrderId>,
    items: HashMap<OrderId, BTreeMap<ProductId, OrderItem>>,
    movements: HashMap<ProductId, Vec<StockMovement>>,
    commit_sequence: u64,
}

impl State {
    fn version_of(&self, key: LockKey) -> Option<u64> {
        match key {
            LockKey::Product(id) => self.products.get(&id).map(|p| p.version()),
            LockKey::Order(id) => self.orders.get(&id).map(|o| o.version()),
        }
    }
}

/// In-memory transactional store.
///
/// Intended for tests/dev and single-process use. Committed state sits behind
/// one `RwLock`; keyed locks serialize writers per aggregate; sequences have
/// their own mutex so numbering never waits on a commit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    locks: LockManager,
    sequences: Mutex<HashMap<OrderType, u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed position (0 before the first commit).
    pub fn commit_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.commit_sequence)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl SequenceSource for InMemoryStore {
    fn increment(&self, order_type: OrderType) -> Result<u64, SequenceError> {
        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| SequenceError::Unavailable("sequence table poisoned".to_string()))?;
        let next = sequences.entry(order_type).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}

impl Store for InMemoryStore {
    fn begin(&self, lock_wait: Duration) -> Result<Box<dyn Transaction + '_>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            lock_wait,
            held: Vec::new(),
            read_versions: BTreeMap::new(),
            products: BTreeMap::new(),
            orders: BTreeMap::new(),
            items: BTreeMap::new(),
            movements: Vec::new(),
        }))
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    fn product_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let state = self.read()?;
        Ok(state
            .skus
            .get(sku)
            .and_then(|id| state.products.get(id))
            .cloned())
    }

    fn products(&self) -> Result<Vec<Product>, StoreError> {
        let mut products: Vec<Product> = self.read()?.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(products)
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let state = self.read()?;
        Ok(state
            .order_numbers
            .get(number)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .read()?
            .items
            .get(&order_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .movements
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A staged write to an aggregate root.
#[derive(Debug)]
enum Staged<T> {
    Insert(T),
    Update(T),
}

impl<T> Staged<T> {
    fn value(&self) -> &T {
        match self {
            Staged::Insert(v) | Staged::Update(v) => v,
        }
    }
}

struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    lock_wait: Duration,
    held: Vec<LockKey>,
    /// Committed version seen when each key was first read (`None` = absent).
    read_versions: BTreeMap<LockKey, Option<u64>>,
    products: BTreeMap<ProductId, Staged<Product>>,
    orders: BTreeMap<OrderId, Staged<Order>>,
    /// `None` marks a deletion.
    items: BTreeMap<(OrderId, ProductId), Option<OrderItem>>,
    movements: Vec<StockMovement>,
}

impl InMemoryTransaction<'_> {
    fn lock(&mut self, key: LockKey) -> Result<(), StoreError> {
        if self.held.contains(&key) {
            return Ok(());
        }
        debug_assert!(
            self.held.last().is_none_or(|last| *last < key),
            "lock acquired out of order: {key} after {:?}",
            self.held.last()
        );
        self.store.locks.acquire(key, self.lock_wait)?;
        self.held.push(key);

        let version = self.store.read()?.version_of(key);
        self.read_versions.entry(key).or_insert(version);
        Ok(())
    }

    fn ensure_locked(&self, key: LockKey) -> Result<(), StoreError> {
        if self.held.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::Concurrency(format!(
                "write to {key} without holding its lock"
            )))
        }
    }
}

impl Transaction for InMemoryTransaction<'_> {
    fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.lock(LockKey::Product(id))?;
        if let Some(staged) = self.products.get(&id) {
            return Ok(Some(staged.value().clone()));
        }
        Ok(self.store.read()?.products.get(&id).cloned())
    }

    fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.lock(LockKey::Order(id))?;
        if let Some(staged) = self.orders.get(&id) {
            return Ok(Some(staged.value().clone()));
        }
        Ok(self.store.read()?.orders.get(&id).cloned())
    }

    fn items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        self.lock(LockKey::Order(order_id))?;
        let mut merged: BTreeMap<ProductId, OrderItem> = self
            .store
            .read()?
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default();
        for ((staged_order, product_id), item) in &self.items {
            if *staged_order != order_id {
                continue;
            }
            match item {
                Some(item) => {
                    merged.insert(*product_id, item.clone());
                }
                None => {
                    merged.remove(product_id);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    fn insert_product(&mut self, product: Product) -> Result<(), StoreError> {
        let id = product.id_typed();
        self.lock(LockKey::Product(id))?;
        if self.products.contains_key(&id) || self.read_versions.get(&LockKey::Product(id)) != Some(&None) {
            return Err(StoreError::Duplicate(format!("product {id}")));
        }
        self.products.insert(id, Staged::Insert(product));
        Ok(())
    }

    fn insert_order(&mut self, order: Order) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.lock(LockKey::Order(id))?;
        if self.orders.contains_key(&id) || self.read_versions.get(&LockKey::Order(id)) != Some(&None) {
            return Err(StoreError::Duplicate(format!("order {id}")));
        }
        self.orders.insert(id, Staged::Insert(order));
        Ok(())
    }

    fn save_product(&mut self, product: Product) -> Result<(), StoreError> {
        let id = product.id_typed();
        self.ensure_locked(LockKey::Product(id))?;
        let staged = match self.products.remove(&id) {
            Some(Staged::Insert(_)) => Staged::Insert(product),
            _ => Staged::Update(product),
        };
        self.products.insert(id, staged);
        Ok(())
    }

    fn save_order(&mut self, order: Order) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.ensure_locked(LockKey::Order(id))?;
        let staged = match self.orders.remove(&id) {
            Some(Staged::Insert(_)) => Staged::Insert(order),
            _ => Staged::Update(order),
        };
        self.orders.insert(id, staged);
        Ok(())
    }

    fn save_item(&mut self, item: OrderItem) -> Result<(), StoreError> {
        self.ensure_locked(LockKey::Order(item.order_id()))?;
        self.items
            .insert((item.order_id(), item.product_id()), Some(item));
        Ok(())
    }

    fn delete_item(&mut self, order_id: OrderId, product_id: ProductId) -> Result<(), StoreError> {
        self.ensure_locked(LockKey::Order(order_id))?;
        self.items.insert((order_id, product_id), None);
        Ok(())
    }

    fn append_movement(&mut self, movement: StockMovement) -> Result<(), StoreError> {
        self.ensure_locked(LockKey::Product(movement.product_id))?;
        self.movements.push(movement);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<CommitReceipt, StoreError> {
        let store = self.store;
        let mut state = store
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        // Verify everything before touching anything.
        for (key, read) in &self.read_versions {
            let expected = match read {
                Some(version) => ExpectedVersion::Exact(*version),
                None => ExpectedVersion::NoAggregate,
            };
            expected
                .check(state.version_of(*key))
                .map_err(|e| StoreError::Concurrency(format!("{key}: {e}")))?;
        }
        for staged in self.products.values() {
            if let Staged::Insert(product) = staged {
                if state.skus.contains_key(product.sku()) {
                    return Err(StoreError::Duplicate(format!("sku {}", product.sku())));
                }
            }
        }
        for staged in self.orders.values() {
            if let Staged::Insert(order) = staged {
                if state.order_numbers.contains_key(order.order_number()) {
                    return Err(StoreError::Duplicate(format!(
                        "order number {}",
                        order.order_number()
                    )));
                }
            }
        }

        for (id, staged) in std::mem::take(&mut self.products) {
            if let Staged::Insert(product) = &staged {
                state.skus.insert(product.sku().to_string(), id);
            }
            let product = match staged {
                Staged::Insert(p) | Staged::Update(p) => p,
            };
            state.products.insert(id, product);
        }
        for (id, staged) in std::mem::take(&mut self.orders) {
            if let Staged::Insert(order) = &staged {
                state.order_numbers.insert(order.order_number().clone(), id);
            }
            let order = match staged {
                Staged::Insert(o) | Staged::Update(o) => o,
            };
            state.orders.insert(id, order);
        }
        for ((order_id, product_id), item) in std::mem::take(&mut self.items) {
            let items = state.items.entry(order_id).or_default();
            match item {
                Some(item) => {
                    items.insert(product_id, item);
                }
                None => {
                    items.remove(&product_id);
                }
            }
        }
        for movement in std::mem::take(&mut self.movements) {
            state
                .movements
                .entry(movement.product_id)
                .or_default()
                .push(movement);
        }

        state.commit_sequence += 1;
        Ok(CommitReceipt {
            sequence: state.commit_sequence,
        })
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        self.store.locks.release_all(self.held.drain(..));
    }
}
