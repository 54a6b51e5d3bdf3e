//! `stockflow-core`: shared domain building blocks.
//!
//! Identifiers, the domain error taxonomy and the versioning contract used by
//! the store for optimistic checks. No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, PartyId, UserId};
