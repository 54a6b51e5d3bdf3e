//! Keyed exclusive locks with bounded waits.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use stockflow_inventory::ProductId;
use stockflow_orders::OrderId;

use super::r#trait::StoreError;

/// Lockable aggregate. Orders sort before products, matching the
/// acquisition protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Order(OrderId),
    Product(ProductId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Order(id) => write!(f, "order {id}"),
            LockKey::Product(id) => write!(f, "product {id}"),
        }
    }
}

/// Table of held keys. A waiter sleeps on the condvar until some key is
/// released or its wait budget runs out.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: LockKey, wait: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + wait;
        let mut held = self
            .held
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table poisoned".to_string()))?;

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout(format!(
                    "{key} still held after {}ms",
                    wait.as_millis()
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Unavailable("lock table poisoned".to_string()))?;
            held = guard;
        }

        held.insert(key);
        Ok(())
    }

    /// Release keys and wake every waiter. Never fails, so it is safe to
    /// call from `Drop`.
    pub fn release_all(&self, keys: impl IntoIterator<Item = LockKey>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            held.remove(&key);
        }
        drop(held);
        self.released.notify_all();
    }

    pub fn is_held(&self, key: LockKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn product_key() -> LockKey {
        LockKey::Product(ProductId::generate())
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let locks = LockManager::new();
        let key = product_key();
        locks.acquire(key, Duration::from_millis(10)).unwrap();

        let err = locks.acquire(key, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_transient());

        locks.release_all([key]);
        assert!(!locks.is_held(key));
        locks.acquire(key, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn waiter_wakes_on_release() {
        let locks = Arc::new(LockManager::new());
        let key = product_key();
        locks.acquire(key, Duration::ZERO).unwrap();

        let waiter = {
            let locks = locks.clone();
            std::thread::spawn(move || locks.acquire(key, Duration::from_secs(2)))
        };
        std::thread::sleep(Duration::from_millis(20));
        locks.release_all([key]);

        assert!(waiter.join().unwrap().is_ok());
        assert!(locks.is_held(key));
    }

    #[test]
    fn distinct_keys_do_not_block() {
        let locks = LockManager::new();
        locks.acquire(product_key(), Duration::ZERO).unwrap();
        locks.acquire(product_key(), Duration::ZERO).unwrap();
        locks
            .acquire(LockKey::Order(OrderId::generate()), Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn orders_sort_before_products() {
        assert!(LockKey::Order(OrderId::generate()) < product_key());
    }
}
