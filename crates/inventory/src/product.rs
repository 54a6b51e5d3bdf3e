use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateId, AggregateRoot, DomainError, DomainResult};

use crate::movement::StockMovement;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stock location (warehouse, aisle, bin). Reference data only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Registration input for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    /// Prices in smallest currency unit (e.g., cents).
    pub cost_price: u64,
    pub selling_price: u64,
    pub minimum_stock_level: i64,
    pub maximum_stock_level: i64,
}

impl NewProduct {
    /// Product with the default stock band (10..=1000).
    pub fn new(sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            cost_price: 0,
            selling_price: 0,
            minimum_stock_level: 10,
            maximum_stock_level: 1000,
        }
    }

    pub fn with_prices(mut self, cost_price: u64, selling_price: u64) -> Self {
        self.cost_price = cost_price;
        self.selling_price = selling_price;
        self
    }

    pub fn with_stock_levels(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum_stock_level = minimum;
        self.maximum_stock_level = maximum;
        self
    }
}

/// Aggregate root: Product.
///
/// `quantity_on_hand` and the per-location quantities are derived from the
/// movement ledger and only change through [`crate::StockLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    cost_price: u64,
    selling_price: u64,
    quantity_on_hand: i64,
    locations: BTreeMap<LocationId, i64>,
    minimum_stock_level: i64,
    maximum_stock_level: i64,
    active: bool,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Validate registration input and build an active product with no stock.
    pub fn register(id: ProductId, input: NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        let sku = input.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if input.minimum_stock_level < 0 || input.maximum_stock_level < 0 {
            return Err(DomainError::validation("stock levels cannot be negative"));
        }
        if input.minimum_stock_level > input.maximum_stock_level {
            return Err(DomainError::validation(
                "minimum_stock_level cannot exceed maximum_stock_level",
            ));
        }

        Ok(Self {
            id,
            sku: sku.to_string(),
            name: input.name.trim().to_string(),
            cost_price: input.cost_price,
            selling_price: input.selling_price,
            quantity_on_hand: 0,
            locations: BTreeMap::new(),
            minimum_stock_level: input.minimum_stock_level,
            maximum_stock_level: input.maximum_stock_level,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cost_price(&self) -> u64 {
        self.cost_price
    }

    pub fn selling_price(&self) -> u64 {
        self.selling_price
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.quantity_on_hand
    }

    /// Quantity held at one location (0 if nothing was ever placed there).
    pub fn location_quantity(&self, location: LocationId) -> i64 {
        self.locations.get(&location).copied().unwrap_or(0)
    }

    pub fn locations(&self) -> &BTreeMap<LocationId, i64> {
        &self.locations
    }

    pub fn minimum_stock_level(&self) -> i64 {
        self.minimum_stock_level
    }

    pub fn maximum_stock_level(&self) -> i64 {
        self.maximum_stock_level
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity_on_hand <= self.minimum_stock_level
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity_on_hand <= 0
    }

    pub fn is_overstocked(&self) -> bool {
        self.quantity_on_hand > self.maximum_stock_level
    }

    /// Margin on the selling price, in percent. Zero when either price is unset.
    pub fn profit_margin(&self) -> f64 {
        if self.cost_price == 0 || self.selling_price == 0 {
            return 0.0;
        }
        let selling = self.selling_price as f64;
        (selling - self.cost_price as f64) / selling * 100.0
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::validation(format!(
                "product {} is inactive",
                self.sku
            )));
        }
        Ok(())
    }

    /// Toggle the active flag. Returns whether anything changed.
    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) -> bool {
        if self.active == active {
            return false;
        }
        self.active = active;
        self.updated_at = now;
        self.version += 1;
        true
    }

    /// Apply one ledger movement to the derived quantities.
    pub(crate) fn apply_movement(&mut self, movement: &StockMovement) -> DomainResult<()> {
        let out_of_range = || DomainError::validation("quantity out of range");
        let on_hand = self
            .quantity_on_hand
            .checked_add(movement.signed_quantity)
            .ok_or_else(out_of_range)?;
        if let Some(location) = movement.location {
            let slot = self.locations.entry(location).or_insert(0);
            *slot = slot.checked_add(movement.signed_quantity).ok_or_else(out_of_range)?;
        }
        self.quantity_on_hand = on_hand;
        self.updated_at = movement.occurred_at;
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(min: i64, max: i64) -> Product {
        Product::register(
            ProductId::generate(),
            NewProduct::new("SKU-1", "Widget").with_stock_levels(min, max),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn register_starts_active_with_no_stock() {
        let p = product(10, 100);
        assert!(p.is_active());
        assert_eq!(p.quantity_on_hand(), 0);
        assert_eq!(p.version(), 1);
        assert!(p.is_out_of_stock());
        assert!(p.is_low_stock());
    }

    #[test]
    fn register_trims_and_validates_sku() {
        let err = Product::register(ProductId::generate(), NewProduct::new("  ", "x"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let p = Product::register(ProductId::generate(), NewProduct::new(" AB-1 ", "x"), Utc::now())
            .unwrap();
        assert_eq!(p.sku(), "AB-1");
    }

    #[test]
    fn register_rejects_inverted_stock_band() {
        let err = Product::register(
            ProductId::generate(),
            NewProduct::new("SKU", "x").with_stock_levels(50, 10),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("minimum_stock_level")));
    }

    #[test]
    fn profit_margin_uses_selling_price_as_base() {
        let p = Product::register(
            ProductId::generate(),
            NewProduct::new("SKU", "x").with_prices(75, 100),
            Utc::now(),
        )
        .unwrap();
        assert!((p.profit_margin() - 25.0).abs() < f64::EPSILON);

        let unpriced = product(0, 10);
        assert_eq!(unpriced.profit_margin(), 0.0);
    }

    #[test]
    fn stock_band_flags_follow_on_hand_quantity() {
        use crate::ledger::{MovementKind, RecordMovement, StockLedger};
        use stockflow_core::UserId;

        let mut p = product(5, 20);
        let receive = |p: &Product, quantity| {
            let cmd = RecordMovement::new(p.id_typed(), MovementKind::In { quantity }, UserId::new());
            StockLedger::post(p, &cmd, Utc::now()).unwrap().product
        };

        p = receive(&p, 5);
        assert!(p.is_low_stock());
        assert!(!p.is_out_of_stock());

        p = receive(&p, 15);
        assert!(!p.is_low_stock());
        assert!(!p.is_overstocked());

        p = receive(&p, 1);
        assert!(p.is_overstocked());
    }

    #[test]
    fn deactivation_bumps_version_once() {
        let mut p = product(0, 10);
        assert!(p.set_active(false, Utc::now()));
        assert!(!p.set_active(false, Utc::now()));
        assert_eq!(p.version(), 2);
        assert!(matches!(p.ensure_active(), Err(DomainError::Validation(_))));
    }
}
