//! Transactional storage boundary for products, orders, items and the ledger.
//!
//! A [`Transaction`] takes keyed locks as it reads (one order first, then
//! products in ascending id order), stages writes, and applies them all at
//! once on commit after re-checking every touched aggregate's version.
//! Dropping a transaction without committing rolls it back.

pub mod in_memory;
pub mod locks;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use locks::{LockKey, LockManager};
pub use r#trait::{CommitReceipt, Store, StoreError, Transaction};
