use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::AggregateId;
use stockflow_events::Event;

use crate::movement::StockMovement;
use crate::product::{Product, ProductId};

pub const PRODUCT_AGGREGATE: &str = "inventory.product";

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded (one per ledger entry; a transfer yields two).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement: StockMovement,
    pub quantity_on_hand: i64,
}

/// Event: LowStockReached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockReached {
    pub product_id: ProductId,
    pub sku: String,
    pub quantity_on_hand: i64,
    pub minimum_stock_level: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ProductRegistered(ProductRegistered),
    MovementRecorded(MovementRecorded),
    LowStockReached(LowStockReached),
}

impl InventoryEvent {
    pub fn registered(product: &Product) -> Self {
        InventoryEvent::ProductRegistered(ProductRegistered {
            product_id: product.id_typed(),
            sku: product.sku().to_string(),
            name: product.name().to_string(),
            occurred_at: product.created_at(),
        })
    }

    pub fn low_stock(product: &Product) -> Self {
        InventoryEvent::LowStockReached(LowStockReached {
            product_id: product.id_typed(),
            sku: product.sku().to_string(),
            quantity_on_hand: product.quantity_on_hand(),
            minimum_stock_level: product.minimum_stock_level(),
            occurred_at: product.updated_at(),
        })
    }

    fn product_id(&self) -> ProductId {
        match self {
            InventoryEvent::ProductRegistered(e) => e.product_id,
            InventoryEvent::MovementRecorded(e) => e.movement.product_id,
            InventoryEvent::LowStockReached(e) => e.product_id,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "inventory.product.registered",
            InventoryEvent::MovementRecorded(_) => "inventory.movement.recorded",
            InventoryEvent::LowStockReached(_) => "inventory.product.low_stock",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ProductRegistered(e) => e.occurred_at,
            InventoryEvent::MovementRecorded(e) => e.movement.occurred_at,
            InventoryEvent::LowStockReached(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.product_id().0
    }

    fn aggregate_type(&self) -> &'static str {
        PRODUCT_AGGREGATE
    }
}
