use chrono::{DateTime, Utc};
use stockflow_core::AggregateId;

/// A domain event describing a committed change.
///
/// Events are facts: immutable, versioned and never retracted. A stock
/// movement that turns out to be wrong is corrected by another movement,
/// not by editing the event.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.movement.recorded").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Aggregate the event belongs to (product or order).
    fn aggregate_id(&self) -> AggregateId;

    /// Aggregate kind, e.g. "inventory.product".
    fn aggregate_type(&self) -> &'static str;
}
