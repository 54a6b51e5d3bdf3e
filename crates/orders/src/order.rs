use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateId, AggregateRoot, DomainError, DomainResult, PartyId, UserId};

use crate::numbering::OrderNumber;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Sale,
    Purchase,
}

impl OrderType {
    pub const ALL: [OrderType; 2] = [OrderType::Sale, OrderType::Purchase];

    /// Order number prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            OrderType::Sale => "SO",
            OrderType::Purchase => "PO",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.prefix() == prefix)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Sale => "sale",
            OrderType::Purchase => "purchase",
        }
    }
}

impl core::fmt::Display for OrderType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status lifecycle.
///
/// ```text
/// pending -> confirmed -> processing -> shipped -> delivered
///    \__________\______________\___________\____-> cancelled | returned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned
        )
    }

    /// Statuses in which sale order items are converted into stock-out movements.
    pub fn is_fulfilling(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Processing | OrderStatus::Shipped
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, next) {
            (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, Shipped)
            | (Shipped, Delivered) => true,
            (from, Cancelled | Returned) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counterparty of an order: a customer for sales, a supplier for purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Party {
    Customer(PartyId),
    Supplier(PartyId),
}

impl Party {
    pub fn id(&self) -> PartyId {
        match self {
            Party::Customer(id) | Party::Supplier(id) => *id,
        }
    }

    pub fn expected_for(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Sale => "customer",
            OrderType::Purchase => "supplier",
        }
    }

    pub fn matches(&self, order_type: OrderType) -> bool {
        matches!(
            (self, order_type),
            (Party::Customer(_), OrderType::Sale) | (Party::Supplier(_), OrderType::Purchase)
        )
    }
}

/// Input for opening an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_type: OrderType,
    pub party: Party,
    pub notes: String,
    pub expected_delivery_date: Option<NaiveDate>,
    pub created_by: UserId,
}

impl NewOrder {
    pub fn sale(customer: PartyId, created_by: UserId) -> Self {
        Self {
            order_type: OrderType::Sale,
            party: Party::Customer(customer),
            notes: String::new(),
            expected_delivery_date: None,
            created_by,
        }
    }

    pub fn purchase(supplier: PartyId, created_by: UserId) -> Self {
        Self {
            order_type: OrderType::Purchase,
            party: Party::Supplier(supplier),
            notes: String::new(),
            expected_delivery_date: None,
            created_by,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_expected_delivery(mut self, date: NaiveDate) -> Self {
        self.expected_delivery_date = Some(date);
        self
    }

    /// Checks that do not need a number; run before one is allocated.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.party.matches(self.order_type) {
            return Err(DomainError::validation(format!(
                "{} order requires a {} party",
                self.order_type,
                Party::expected_for(self.order_type)
            )));
        }
        Ok(())
    }
}

/// Aggregate root: Order.
///
/// `total_amount` is derived from the items and only changes through
/// [`crate::OrderAggregator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_number: OrderNumber,
    order_type: OrderType,
    status: OrderStatus,
    party: Party,
    total_amount: u64,
    notes: String,
    expected_delivery_date: Option<NaiveDate>,
    created_by: UserId,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Open a pending order under an already allocated number.
    pub fn open(
        id: OrderId,
        order_number: OrderNumber,
        input: NewOrder,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        input.validate()?;
        if order_number.order_type() != input.order_type {
            return Err(DomainError::invariant(format!(
                "order number {order_number} does not belong to a {} order",
                input.order_type
            )));
        }

        Ok(Self {
            id,
            order_number,
            order_type: input.order_type,
            status: OrderStatus::Pending,
            party: input.party,
            total_amount: 0,
            notes: input.notes,
            expected_delivery_date: input.expected_delivery_date,
            created_by: input.created_by,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &OrderNumber {
        &self.order_number
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn party(&self) -> Party {
        self.party
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_modifiable(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether item writes on this order must cascade into stock-out movements.
    pub fn cascades_stock_out(&self) -> bool {
        self.order_type == OrderType::Sale && self.status.is_fulfilling()
    }

    pub fn ensure_modifiable(&self) -> DomainResult<()> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(format!(
                "order {} is {}; items can no longer change",
                self.order_number, self.status
            )));
        }
        Ok(())
    }

    /// Move to `next` if the transition table allows it. Returns the previous status.
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> DomainResult<OrderStatus> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }
        let previous = self.status;
        self.status = next;
        self.touch(now);
        Ok(previous)
    }

    pub(crate) fn set_total(&mut self, total_amount: u64, now: DateTime<Utc>) {
        self.total_amount = total_amount;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
