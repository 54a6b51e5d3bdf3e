//! Infrastructure layer: transactional store, coordinator, configuration.

pub mod config;
pub mod coordinator;
pub mod outbox;
pub mod retry;
pub mod store;


pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{ConsistencyCoordinator, CoordinatorError};
pub use outbox::{Outbox, UncommittedEvent};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{CommitReceipt, InMemoryStore, LockKey, LockManager, Store, StoreError, Transaction};
