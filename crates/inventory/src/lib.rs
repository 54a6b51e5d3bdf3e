//! Inventory domain module.
//!
//! Products, the immutable movement records and the [`StockLedger`] that turns
//! movement requests into signed postings. Pure domain logic: no IO, no locks.

pub mod events;
pub mod ledger;
pub mod movement;
pub mod product;

pub use events::{InventoryEvent, LowStockReached, MovementRecorded, ProductRegistered};
pub use ledger::{LedgerBalance, LedgerPosting, MovementKind, RecordMovement, StockLedger};
pub use movement::{MovementId, MovementType, StockMovement};
pub use product::{LocationId, NewProduct, Product, ProductId};
