use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::UserId;

use crate::product::{LocationId, ProductId};

/// Identifier of a ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of stock movement as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    Transfer,
    Damaged,
    Expired,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
            MovementType::Damaged => "damaged",
            MovementType::Expired => "expired",
        }
    }

    /// Types whose sign is fixed negative.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            MovementType::Out | MovementType::Damaged | MovementType::Expired
        )
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry. Created once, never edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Magnitude, always positive.
    pub quantity: i64,
    /// Delta applied to `quantity_on_hand`.
    pub signed_quantity: i64,
    pub location: Option<LocationId>,
    /// Shared by both legs of a transfer.
    pub transfer_id: Option<Uuid>,
    pub reference: String,
    pub notes: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn is_decrease(&self) -> bool {
        self.signed_quantity < 0
    }
}
