//! Stock ledger: turns movement requests into signed, immutable postings.
//!
//! The ledger never mutates stored state itself. [`StockLedger::post`] takes
//! the current product and returns the movements to append together with the
//! product as it must look after they are applied; the caller commits both in
//! one unit. Replaying a product's movements with [`StockLedger::replay`] must
//! always reproduce its stored quantities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{DomainError, DomainResult, UserId};

use crate::movement::{MovementId, MovementType, StockMovement};
use crate::product::{LocationId, Product, ProductId};

/// What to record. Quantities are magnitudes and must be positive; an
/// adjustment carries its own signed delta instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MovementKind {
    In { quantity: i64 },
    Out { quantity: i64 },
    Damaged { quantity: i64 },
    Expired { quantity: i64 },
    Adjustment { delta: i64 },
    Transfer {
        quantity: i64,
        from: LocationId,
        to: LocationId,
    },
}

impl MovementKind {
    pub fn movement_type(&self) -> MovementType {
        match self {
            MovementKind::In { .. } => MovementType::In,
            MovementKind::Out { .. } => MovementType::Out,
            MovementKind::Damaged { .. } => MovementType::Damaged,
            MovementKind::Expired { .. } => MovementType::Expired,
            MovementKind::Adjustment { .. } => MovementType::Adjustment,
            MovementKind::Transfer { .. } => MovementType::Transfer,
        }
    }
}

/// Command: record a movement against one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Location for non-transfer movements. Transfers name both ends in `kind`.
    pub location: Option<LocationId>,
    pub reference: String,
    pub notes: String,
    pub actor: UserId,
    /// Explicit override allowing stock to go negative.
    pub allow_backorder: bool,
}

impl RecordMovement {
    pub fn new(product_id: ProductId, kind: MovementKind, actor: UserId) -> Self {
        Self {
            product_id,
            kind,
            location: None,
            reference: String::new(),
            notes: String::new(),
            actor,
            allow_backorder: false,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn allowing_backorder(mut self) -> Self {
        self.allow_backorder = true;
        self
    }
}

/// Result of posting a movement: entries to append and the updated product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub product: Product,
    pub movements: Vec<StockMovement>,
    /// The posting took the product from above its minimum level to at or below it.
    pub crossed_low_stock: bool,
}

/// Quantities re-derived from a movement history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBalance {
    pub on_hand: i64,
    pub locations: BTreeMap<LocationId, i64>,
}

/// One signed leg of a posting.
struct Leg {
    location: Option<LocationId>,
    signed: i64,
}

pub struct StockLedger;

impl StockLedger {
    /// Validate a movement request against the product's current state and
    /// produce the posting.
    pub fn post(
        product: &Product,
        cmd: &RecordMovement,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<LedgerPosting> {
        if cmd.product_id != product.id_typed() {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        product.ensure_active()?;

        let legs = Self::legs(cmd)?;
        Self::ensure_available(product, &legs, cmd.allow_backorder)?;

        let transfer_id = match cmd.kind {
            MovementKind::Transfer { .. } => Some(Uuid::now_v7()),
            _ => None,
        };
        let movement_type = cmd.kind.movement_type();

        let movements: Vec<StockMovement> = legs
            .iter()
            .map(|leg| StockMovement {
                id: MovementId::generate(),
                product_id: product.id_typed(),
                movement_type,
                quantity: leg.signed.abs(),
                signed_quantity: leg.signed,
                location: leg.location,
                transfer_id,
                reference: cmd.reference.clone(),
                notes: cmd.notes.clone(),
                actor: cmd.actor,
                occurred_at,
            })
            .collect();

        let mut updated = product.clone();
        for movement in &movements {
            updated.apply_movement(movement)?;
        }

        Ok(LedgerPosting {
            crossed_low_stock: !product.is_low_stock() && updated.is_low_stock(),
            product: updated,
            movements,
        })
    }

    /// Post an `out` movement for a fulfillment cascade.
    pub fn stock_out(
        product: &Product,
        quantity: i64,
        reference: impl Into<String>,
        actor: UserId,
        allow_backorder: bool,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<LedgerPosting> {
        let reference = reference.into();
        let mut cmd = RecordMovement::new(product.id_typed(), MovementKind::Out { quantity }, actor)
            .with_notes(format!("Sales order {reference}"))
            .with_reference(reference);
        cmd.allow_backorder = allow_backorder;
        Self::post(product, &cmd, occurred_at)
    }

    /// Re-derive quantities from a movement history.
    pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> LedgerBalance {
        let mut balance = LedgerBalance::default();
        for movement in movements {
            balance.on_hand += movement.signed_quantity;
            if let Some(location) = movement.location {
                *balance.locations.entry(location).or_insert(0) += movement.signed_quantity;
            }
        }
        balance
    }

    /// Check a product's stored quantities against its ledger.
    pub fn verify<'a>(
        product: &Product,
        movements: impl IntoIterator<Item = &'a StockMovement>,
    ) -> DomainResult<LedgerBalance> {
        let balance = Self::replay(movements);
        if balance.on_hand != product.quantity_on_hand() {
            return Err(DomainError::invariant(format!(
                "product {} on hand {} but ledger sums to {}",
                product.sku(),
                product.quantity_on_hand(),
                balance.on_hand
            )));
        }
        for (location, quantity) in product.locations() {
            let replayed = balance.locations.get(location).copied().unwrap_or(0);
            if replayed != *quantity {
                return Err(DomainError::invariant(format!(
                    "product {} holds {} at {} but ledger sums to {}",
                    product.sku(),
                    quantity,
                    location,
                    replayed
                )));
            }
        }
        Ok(balance)
    }

    fn legs(cmd: &RecordMovement) -> DomainResult<Vec<Leg>> {
        let positive = |quantity: i64| -> DomainResult<i64> {
            if quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            Ok(quantity)
        };

        let legs = match cmd.kind {
            MovementKind::In { quantity } => vec![Leg {
                location: cmd.location,
                signed: positive(quantity)?,
            }],
            MovementKind::Out { quantity }
            | MovementKind::Damaged { quantity }
            | MovementKind::Expired { quantity } => vec![Leg {
                location: cmd.location,
                signed: -positive(quantity)?,
            }],
            MovementKind::Adjustment { delta } => {
                if delta == 0 {
                    return Err(DomainError::validation("adjustment delta cannot be zero"));
                }
                vec![Leg {
                    location: cmd.location,
                    signed: delta,
                }]
            }
            MovementKind::Transfer { quantity, from, to } => {
                let quantity = positive(quantity)?;
                if from == to {
                    return Err(DomainError::validation(
                        "transfer source and destination must differ",
                    ));
                }
                if cmd.location.is_some() {
                    return Err(DomainError::validation(
                        "transfer locations are given by the movement kind",
                    ));
                }
                vec![
                    Leg {
                        location: Some(from),
                        signed: -quantity,
                    },
                    Leg {
                        location: Some(to),
                        signed: quantity,
                    },
                ]
            }
        };
        Ok(legs)
    }

    fn ensure_available(product: &Product, legs: &[Leg], allow_backorder: bool) -> DomainResult<()> {
        let net = legs
            .iter()
            .try_fold(0i64, |acc, leg| acc.checked_add(leg.signed))
            .ok_or_else(|| DomainError::validation("quantity out of range"))?;
        let after = product
            .quantity_on_hand()
            .checked_add(net)
            .ok_or_else(|| DomainError::validation("quantity out of range"))?;

        if allow_backorder {
            return Ok(());
        }

        if net < 0 && after < 0 {
            return Err(DomainError::insufficient_stock(
                product.id_typed(),
                -net,
                product.quantity_on_hand(),
            ));
        }

        for leg in legs.iter().filter(|leg| leg.signed < 0) {
            if let Some(location) = leg.location {
                let available = product.location_quantity(location);
                let after = available
                    .checked_add(leg.signed)
                    .ok_or_else(|| DomainError::validation("quantity out of range"))?;
                if after < 0 {
                    return Err(DomainError::insufficient_stock(
                        product.id_typed(),
                        -leg.signed,
                        available,
                    ));
                }
            }
        }

        Ok(())
    }
}
