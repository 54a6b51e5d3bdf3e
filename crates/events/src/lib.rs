//! Post-commit notifications.
//!
//! Domain crates describe what happened as typed [`Event`]s; the coordinator
//! wraps committed events in an [`EventEnvelope`] and publishes them on an
//! [`EventBus`]. The bus is for distribution only; the store stays the source
//! of truth.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
