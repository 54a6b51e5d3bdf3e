//! Item upkeep and the fulfillment cascade.
//!
//! Pure functions over loaded state. The caller holds the order lock, passes
//! the current items, and persists whatever comes back together with the
//! ledger postings for any `stock_out` requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, UserId};
use stockflow_inventory::{Product, ProductId};

use crate::item::OrderItem;
use crate::order::{Order, OrderStatus};

/// An `out` movement the ledger must post for a fulfilled item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOutRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// The order number.
    pub reference: String,
    pub actor: UserId,
}

impl StockOutRequest {
    fn for_item(order: &Order, item: &OrderItem, quantity: i64) -> Self {
        Self {
            product_id: item.product_id(),
            quantity,
            reference: order.order_number().to_string(),
            actor: order.created_by(),
        }
    }
}

/// Result of an item upsert or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemChange {
    pub order: Order,
    pub item: OrderItem,
    pub created: bool,
    pub stock_out: Option<StockOutRequest>,
}

/// Result of a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order: Order,
    pub previous: OrderStatus,
    /// Items whose `fulfilled_quantity` moved.
    pub items: Vec<OrderItem>,
    /// One per entry in `items`, same order.
    pub stock_outs: Vec<StockOutRequest>,
}

pub struct OrderAggregator;

impl OrderAggregator {
    /// Create or replace the item for `(order, product)` and recompute totals.
    pub fn upsert_item(
        order: &Order,
        items: &[OrderItem],
        product: &Product,
        quantity: i64,
        unit_price: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<ItemChange> {
        order.ensure_modifiable()?;
        product.ensure_active()?;
        Self::ensure_owned(order, items)?;

        let product_id = product.id_typed();
        let existing = items.iter().find(|i| i.product_id() == product_id);
        let created = existing.is_none();

        let mut item = match existing {
            Some(current) => {
                let mut item = current.clone();
                item.reprice(quantity, unit_price, now)?;
                item
            }
            None => OrderItem::new(order.id_typed(), product_id, quantity, unit_price, now)?,
        };

        let mut stock_out = None;
        if order.cascades_stock_out() {
            let delta = item.fulfil(now);
            if delta > 0 {
                stock_out = Some(StockOutRequest::for_item(order, &item, delta));
            }
        }

        let total = Self::total(
            items
                .iter()
                .filter(|i| i.product_id() != product_id)
                .chain(std::iter::once(&item)),
        )?;
        let mut order = order.clone();
        order.set_total(total, now);

        Ok(ItemChange {
            order,
            item,
            created,
            stock_out,
        })
    }

    /// Remove the item for `product_id`. Only allowed before any unit was fulfilled.
    pub fn remove_item(
        order: &Order,
        items: &[OrderItem],
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> DomainResult<ItemChange> {
        order.ensure_modifiable()?;
        Self::ensure_owned(order, items)?;

        let item = items
            .iter()
            .find(|i| i.product_id() == product_id)
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "item for product {product_id} on order {}",
                    order.order_number()
                ))
            })?;
        if item.fulfilled_quantity() > 0 {
            return Err(DomainError::invariant(format!(
                "{} units of product {product_id} already left stock for order {}",
                item.fulfilled_quantity(),
                order.order_number()
            )));
        }

        let total = Self::total(items.iter().filter(|i| i.product_id() != product_id))?;
        let mut order = order.clone();
        order.set_total(total, now);

        Ok(ItemChange {
            order,
            item: item.clone(),
            created: false,
            stock_out: None,
        })
    }

    /// Apply a status transition and, when it enters a fulfilling status on a
    /// sale order, fulfil every outstanding item.
    pub fn transition(
        order: &Order,
        items: &[OrderItem],
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        Self::ensure_owned(order, items)?;

        let mut order = order.clone();
        let previous = order.transition_to(next, now)?;

        let mut changed = Vec::new();
        let mut stock_outs = Vec::new();
        if order.cascades_stock_out() {
            let mut sorted: Vec<&OrderItem> = items.iter().collect();
            sorted.sort_by_key(|i| i.product_id());
            for current in sorted {
                let mut item = current.clone();
                let delta = item.fulfil(now);
                if delta > 0 {
                    stock_outs.push(StockOutRequest::for_item(&order, &item, delta));
                    changed.push(item);
                }
            }
        }

        Ok(StatusChange {
            order,
            previous,
            items: changed,
            stock_outs,
        })
    }

    /// Sum of line totals.
    pub fn total<'a>(items: impl IntoIterator<Item = &'a OrderItem>) -> DomainResult<u64> {
        items.into_iter().try_fold(0u64, |acc, item| {
            acc.checked_add(item.total_price())
                .ok_or_else(|| DomainError::validation("order total overflows"))
        })
    }

    fn ensure_owned(order: &Order, items: &[OrderItem]) -> DomainResult<()> {
        match items.iter().find(|i| i.order_id() != order.id_typed()) {
            Some(stray) => Err(DomainError::invariant(format!(
                "item for product {} belongs to order {}, not {}",
                stray.product_id(),
                stray.order_id(),
                order.id_typed()
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbering::OrderNumber;
    use crate::order::{NewOrder, OrderId, OrderType};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use stockflow_core::{AggregateRoot, PartyId};
    use stockflow_inventory::NewProduct;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn product(sku: &str) -> Product {
        Product::register(ProductId::generate(), NewProduct::new(sku, "Widget"), test_time()).unwrap()
    }

    fn order(order_type: OrderType) -> Order {
        let input = match order_type {
            OrderType::Sale => NewOrder::sale(PartyId::new(), UserId::new()),
            OrderType::Purchase => NewOrder::purchase(PartyId::new(), UserId::new()),
        };
        Order::open(
            OrderId::generate(),
            OrderNumber::format(order_type, 7),
            input,
            test_time(),
        )
        .unwrap()
    }

    fn confirmed_sale() -> Order {
        let mut order = order(OrderType::Sale);
        order.transition_to(OrderStatus::Confirmed, test_time()).unwrap();
        order
    }

    #[test]
    fn pending_upsert_recomputes_total_without_stock_out() {
        let order = order(OrderType::Sale);
        let widget = product("W-1");

        let change = OrderAggregator::upsert_item(&order, &[], &widget, 4, 100, test_time()).unwrap();
        assert!(change.created);
        assert_eq!(change.item.total_price(), 400);
        assert_eq!(change.order.total_amount(), 400);
        assert_eq!(change.order.version(), order.version() + 1);
        assert!(change.stock_out.is_none());
    }

    #[test]
    fn upsert_replaces_instead_of_duplicating() {
        let order = order(OrderType::Sale);
        let widget = product("W-1");
        let gadget = product("G-1");

        let first = OrderAggregator::upsert_item(&order, &[], &widget, 4, 100, test_time()).unwrap();
        let second =
            OrderAggregator::upsert_item(&first.order, &[first.item.clone()], &gadget, 1, 50, test_time())
                .unwrap();
        let items = vec![first.item.clone(), second.item.clone()];

        let replaced = OrderAggregator::upsert_item(&second.order, &items, &widget, 2, 120, test_time())
            .unwrap();
        assert!(!replaced.created);
        assert_eq!(replaced.item.quantity(), 2);
        assert_eq!(replaced.order.total_amount(), 240 + 50);
    }

    #[test]
    fn fulfilling_sale_emits_only_the_delta() {
        let order = confirmed_sale();
        let widget = product("W-1");

        let first = OrderAggregator::upsert_item(&order, &[], &widget, 4, 100, test_time()).unwrap();
        let out = first.stock_out.clone().unwrap();
        assert_eq!(out.quantity, 4);
        assert_eq!(out.reference, "SO-000007");
        assert_eq!(out.actor, order.created_by());
        assert_eq!(first.item.fulfilled_quantity(), 4);

        let second =
            OrderAggregator::upsert_item(&first.order, &[first.item.clone()], &widget, 7, 100, test_time())
                .unwrap();
        assert_eq!(second.stock_out.unwrap().quantity, 3);
        assert_eq!(second.item.fulfilled_quantity(), 7);
        assert_eq!(second.order.total_amount(), 700);

        let repeat =
            OrderAggregator::upsert_item(&second.order, &[second.item.clone()], &widget, 7, 90, test_time())
                .unwrap();
        assert!(repeat.stock_out.is_none());
        assert_eq!(repeat.order.total_amount(), 630);
    }

    #[test]
    fn fulfilling_sale_cannot_shrink_below_fulfilled() {
        let order = confirmed_sale();
        let widget = product("W-1");
        let first = OrderAggregator::upsert_item(&order, &[], &widget, 5, 10, test_time()).unwrap();

        let err = OrderAggregator::upsert_item(&first.order, &[first.item], &widget, 2, 10, test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn purchase_orders_never_cascade() {
        let mut order = order(OrderType::Purchase);
        order.transition_to(OrderStatus::Confirmed, test_time()).unwrap();
        let widget = product("W-1");

        let change = OrderAggregator::upsert_item(&order, &[], &widget, 5, 10, test_time()).unwrap();
        assert!(change.stock_out.is_none());
        assert_eq!(change.item.fulfilled_quantity(), 0);
    }

    #[test]
    fn terminal_orders_refuse_item_edits() {
        let mut order = order(OrderType::Sale);
        order.transition_to(OrderStatus::Cancelled, test_time()).unwrap();
        let widget = product("W-1");

        match OrderAggregator::upsert_item(&order, &[], &widget, 1, 10, test_time()) {
            Err(DomainError::InvariantViolation(msg)) if msg.contains("cancelled") => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inactive_product_is_refused() {
        let order = order(OrderType::Sale);
        let mut widget = product("W-1");
        widget.set_active(false, test_time());

        assert!(matches!(
            OrderAggregator::upsert_item(&order, &[], &widget, 1, 10, test_time()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn confirming_fulfils_every_item_once() {
        let order = order(OrderType::Sale);
        let widget = product("W-1");
        let gadget = product("G-1");
        let a = OrderAggregator::upsert_item(&order, &[], &widget, 4, 100, test_time()).unwrap();
        let b = OrderAggregator::upsert_item(&a.order, &[a.item.clone()], &gadget, 2, 50, test_time())
            .unwrap();
        let items = vec![a.item, b.item];

        let confirmed =
            OrderAggregator::transition(&b.order, &items, OrderStatus::Confirmed, test_time()).unwrap();
        assert_eq!(confirmed.previous, OrderStatus::Pending);
        assert_eq!(confirmed.stock_outs.len(), 2);
        let mut quantities: Vec<i64> = confirmed.stock_outs.iter().map(|s| s.quantity).collect();
        quantities.sort();
        assert_eq!(quantities, vec![2, 4]);

        let processing = OrderAggregator::transition(
            &confirmed.order,
            &confirmed.items,
            OrderStatus::Processing,
            test_time(),
        )
        .unwrap();
        assert!(processing.stock_outs.is_empty());
        assert!(processing.items.is_empty());
    }

    #[test]
    fn remove_item_only_before_fulfillment() {
        let order = order(OrderType::Sale);
        let widget = product("W-1");
        let added = OrderAggregator::upsert_item(&order, &[], &widget, 3, 10, test_time()).unwrap();

        let removed = OrderAggregator::remove_item(
            &added.order,
            &[added.item.clone()],
            widget.id_typed(),
            test_time(),
        )
        .unwrap();
        assert_eq!(removed.order.total_amount(), 0);

        let confirmed = OrderAggregator::transition(
            &added.order,
            &[added.item.clone()],
            OrderStatus::Confirmed,
            test_time(),
        )
        .unwrap();
        let err = OrderAggregator::remove_item(
            &confirmed.order,
            &confirmed.items,
            widget.id_typed(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn remove_missing_item_is_not_found() {
        let order = order(OrderType::Sale);
        let err = OrderAggregator::remove_item(&order, &[], ProductId::generate(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn total_tracks_item_totals(
            edits in prop::collection::vec((0usize..4, 1i64..50, 0u64..1_000), 1..40)
        ) {
            let products: Vec<Product> = (0..4).map(|i| product(&format!("SKU-{i}"))).collect();
            let mut order = order(OrderType::Sale);
            let mut items: Vec<OrderItem> = Vec::new();

            for (slot, quantity, price) in edits {
                let change = OrderAggregator::upsert_item(
                    &order, &items, &products[slot], quantity, price, test_time(),
                ).unwrap();
                items.retain(|i| i.product_id() != change.item.product_id());
                items.push(change.item);
                order = change.order;

                let expected: u64 = items.iter().map(|i| i.total_price()).sum();
                prop_assert_eq!(order.total_amount(), expected);
                prop_assert!(items.len() <= products.len());
            }
        }
    }
}
