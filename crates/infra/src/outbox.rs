//! Events collected during a transaction attempt, published after commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockflow_core::AggregateId;
use stockflow_events::{Event, EventEnvelope};

/// An event ready for publication, not yet stamped with a commit sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: &'static str,
    pub event_type: &'static str,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(event: &E) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id: event.aggregate_id(),
            aggregate_type: event.aggregate_type(),
            event_type: event.event_type(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }

    pub fn into_envelope(self, commit_sequence: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type,
            commit_sequence,
            self.event_type,
            self.occurred_at,
            self.payload,
        )
    }
}

/// Per-attempt event buffer. Discarded together with a rolled-back attempt.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<UncommittedEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<E>(&mut self, event: &E)
    where
        E: Event + Serialize,
    {
        match UncommittedEvent::from_typed(event) {
            Ok(uncommitted) => self.events.push(uncommitted),
            // Publication is best-effort; never fail the business operation.
            Err(err) => tracing::warn!(
                event_type = event.event_type(),
                error = %err,
                "dropping unserializable event"
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_envelopes(self, commit_sequence: u64) -> Vec<EventEnvelope<JsonValue>> {
        self.events
            .into_iter()
            .map(|e| e.into_envelope(commit_sequence))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_inventory::{InventoryEvent, NewProduct, Product, ProductId};

    #[test]
    fn envelopes_carry_event_metadata_and_commit_sequence() {
        let product =
            Product::register(ProductId::generate(), NewProduct::new("W-1", "Widget"), Utc::now())
                .unwrap();
        let mut outbox = Outbox::new();
        outbox.record(&InventoryEvent::registered(&product));
        outbox.record(&InventoryEvent::low_stock(&product));
        assert_eq!(outbox.len(), 2);

        let envelopes = outbox.into_envelopes(9);
        assert_eq!(envelopes[0].event_type(), "inventory.product.registered");
        assert_eq!(envelopes[1].event_type(), "inventory.product.low_stock");
        assert!(envelopes.iter().all(|e| e.commit_sequence() == 9));
        assert_eq!(envelopes[0].aggregate_id(), product.id_typed().0);
        assert_eq!(envelopes[0].payload()["ProductRegistered"]["sku"], "W-1");
    }
}
