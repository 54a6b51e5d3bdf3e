use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::AggregateId;
use stockflow_events::Event;
use stockflow_inventory::ProductId;

use crate::item::OrderItem;
use crate::numbering::OrderNumber;
use crate::order::{Order, OrderId, OrderStatus, OrderType, Party};

pub const ORDER_AGGREGATE: &str = "orders.order";

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub order_type: OrderType,
    pub party: Party,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemUpserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpserted {
    pub order_id: OrderId,
    pub item: OrderItem,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    ItemUpserted(ItemUpserted),
    ItemRemoved(ItemRemoved),
    OrderStatusChanged(OrderStatusChanged),
}

impl OrderEvent {
    pub fn created(order: &Order) -> Self {
        OrderEvent::OrderCreated(OrderCreated {
            order_id: order.id_typed(),
            order_number: order.order_number().clone(),
            order_type: order.order_type(),
            party: order.party(),
            occurred_at: order.created_at(),
        })
    }

    pub fn item_upserted(order: &Order, item: &OrderItem) -> Self {
        OrderEvent::ItemUpserted(ItemUpserted {
            order_id: order.id_typed(),
            item: item.clone(),
            total_amount: order.total_amount(),
            occurred_at: order.updated_at(),
        })
    }

    pub fn item_removed(order: &Order, product_id: ProductId) -> Self {
        OrderEvent::ItemRemoved(ItemRemoved {
            order_id: order.id_typed(),
            product_id,
            total_amount: order.total_amount(),
            occurred_at: order.updated_at(),
        })
    }

    pub fn status_changed(order: &Order, from: OrderStatus) -> Self {
        OrderEvent::OrderStatusChanged(OrderStatusChanged {
            order_id: order.id_typed(),
            order_number: order.order_number().clone(),
            from,
            to: order.status(),
            occurred_at: order.updated_at(),
        })
    }

    fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated(e) => e.order_id,
            OrderEvent::ItemUpserted(e) => e.order_id,
            OrderEvent::ItemRemoved(e) => e.order_id,
            OrderEvent::OrderStatusChanged(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::ItemUpserted(_) => "orders.order.item_upserted",
            OrderEvent::ItemRemoved(_) => "orders.order.item_removed",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::ItemUpserted(e) => e.occurred_at,
            OrderEvent::ItemRemoved(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.order_id().0
    }

    fn aggregate_type(&self) -> &'static str {
        ORDER_AGGREGATE
    }
}
