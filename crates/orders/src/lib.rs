//! Orders domain module (sales and purchase orders).
//!
//! Order lifecycle, line items with derived totals, the fulfillment cascade
//! and order numbering. Deterministic domain logic only; the coordinator in
//! `stockflow-infra` runs it inside store transactions.

pub mod aggregator;
pub mod events;
pub mod item;
pub mod numbering;
pub mod order;

pub use aggregator::{ItemChange, OrderAggregator, StatusChange, StockOutRequest};
pub use events::{
    ItemRemoved, ItemUpserted, OrderCreated, OrderEvent, OrderStatusChanged, ORDER_AGGREGATE,
};
pub use item::OrderItem;
pub use numbering::{OrderNumber, SequenceAllocator, SequenceError, SequenceSource};
pub use order::{NewOrder, Order, OrderId, OrderStatus, OrderType, Party};
