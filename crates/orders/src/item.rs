use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult};
use stockflow_inventory::ProductId;

use crate::order::OrderId;

/// Line item of an order. Unique per (order, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    order_id: OrderId,
    product_id: ProductId,
    quantity: i64,
    unit_price: u64,
    total_price: u64,
    /// Units already converted into stock-out movements.
    fulfilled_quantity: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        quantity: i64,
        unit_price: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let total_price = line_total(quantity, unit_price)?;
        Ok(Self {
            order_id,
            product_id,
            quantity,
            unit_price,
            total_price,
            fulfilled_quantity: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn fulfilled_quantity(&self) -> i64 {
        self.fulfilled_quantity
    }

    /// Units still owed to the ledger.
    pub fn unfulfilled_quantity(&self) -> i64 {
        self.quantity - self.fulfilled_quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace quantity and price, recomputing the line total.
    pub(crate) fn reprice(&mut self, quantity: i64, unit_price: u64, now: DateTime<Utc>) -> DomainResult<()> {
        let total_price = line_total(quantity, unit_price)?;
        if quantity < self.fulfilled_quantity {
            return Err(DomainError::validation(format!(
                "quantity {quantity} is below the {} units already fulfilled",
                self.fulfilled_quantity
            )));
        }
        self.quantity = quantity;
        self.unit_price = unit_price;
        self.total_price = total_price;
        self.updated_at = now;
        Ok(())
    }

    /// Mark every unit as fulfilled and return how many were newly fulfilled.
    pub(crate) fn fulfil(&mut self, now: DateTime<Utc>) -> i64 {
        let delta = self.unfulfilled_quantity();
        if delta > 0 {
            self.fulfilled_quantity = self.quantity;
            self.updated_at = now;
        }
        delta.max(0)
    }
}

fn line_total(quantity: i64, unit_price: u64) -> DomainResult<u64> {
    if quantity <= 0 {
        return Err(DomainError::validation(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    (quantity as u64)
        .checked_mul(unit_price)
        .ok_or_else(|| DomainError::validation("line total overflows"))
}
