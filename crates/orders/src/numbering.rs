//! Human-readable order numbers (`SO-000001`, `PO-000042`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{DomainError, DomainResult};

use crate::order::OrderType;

/// Formatted order number, unique per order type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn format(order_type: OrderType, sequence: u64) -> Self {
        Self(format!("{}-{:06}", order_type.prefix(), sequence))
    }

    /// Recover `(type, sequence)` from a formatted number.
    pub fn parse(value: &str) -> DomainResult<(OrderType, u64)> {
        let malformed = || DomainError::validation(format!("malformed order number: {value:?}"));

        let (prefix, digits) = value.split_once('-').ok_or_else(malformed)?;
        let order_type = OrderType::from_prefix(prefix).ok_or_else(malformed)?;
        if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let sequence: u64 = digits.parse().map_err(|_| malformed())?;
        if sequence == 0 || Self::format(order_type, sequence).0 != value {
            return Err(malformed());
        }
        Ok((order_type, sequence))
    }

    pub fn order_type(&self) -> OrderType {
        // Constructed only through `format` or a successful `parse`.
        match self.0.split_once('-') {
            Some(("PO", _)) => OrderType::Purchase,
            _ => OrderType::Sale,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::str::FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (order_type, sequence) = Self::parse(s)?;
        Ok(Self::format(order_type, sequence))
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// The increment lost a race or timed out; trying again may succeed.
    #[error("sequence increment failed transiently: {0}")]
    Transient(String),

    #[error("sequence source unavailable: {0}")]
    Unavailable(String),
}

/// Durable per-type counter.
///
/// `increment` must be an atomic increment-and-read: two callers never see
/// the same value.
pub trait SequenceSource {
    fn increment(&self, order_type: OrderType) -> Result<u64, SequenceError>;
}

impl<S: SequenceSource + ?Sized> SequenceSource for &S {
    fn increment(&self, order_type: OrderType) -> Result<u64, SequenceError> {
        (**self).increment(order_type)
    }
}

impl<S: SequenceSource + ?Sized> SequenceSource for Arc<S> {
    fn increment(&self, order_type: OrderType) -> Result<u64, SequenceError> {
        (**self).increment(order_type)
    }
}

/// Allocates order numbers from a [`SequenceSource`], retrying transient
/// increment failures a bounded number of times.
pub struct SequenceAllocator<'a, S: ?Sized> {
    source: &'a S,
    max_attempts: u32,
}

impl<'a, S: SequenceSource + ?Sized> SequenceAllocator<'a, S> {
    pub fn new(source: &'a S, max_attempts: u32) -> Self {
        Self {
            source,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn next(&self, order_type: OrderType) -> DomainResult<OrderNumber> {
        let exhausted = |attempts| DomainError::AllocationExhausted {
            order_type: order_type.to_string(),
            attempts,
        };

        for attempt in 1..=self.max_attempts {
            match self.source.increment(order_type) {
                Ok(sequence) => return Ok(OrderNumber::format(order_type, sequence)),
                Err(SequenceError::Transient(_)) => continue,
                Err(SequenceError::Unavailable(_)) => return Err(exhausted(attempt)),
            }
        }
        Err(exhausted(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Fails transiently `failures` times, then counts up from 1.
    struct FlakySource {
        failures: Cell<u32>,
        calls: Cell<u32>,
        next: Cell<u64>,
    }

    impl FlakySource {
        fn new(failures: u32) -> Self {
            Self {
                failures: Cell::new(failures),
                calls: Cell::new(0),
                next: Cell::new(0),
            }
        }
    }

    impl SequenceSource for FlakySource {
        fn increment(&self, _order_type: OrderType) -> Result<u64, SequenceError> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(SequenceError::Transient("lock wait".into()));
            }
            self.next.set(self.next.get() + 1);
            Ok(self.next.get())
        }
    }

    struct DownSource;

    impl SequenceSource for DownSource {
        fn increment(&self, _order_type: OrderType) -> Result<u64, SequenceError> {
            Err(SequenceError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn formats_with_six_digit_padding() {
        assert_eq!(OrderNumber::format(OrderType::Sale, 1).as_str(), "SO-000001");
        assert_eq!(OrderNumber::format(OrderType::Purchase, 42).as_str(), "PO-000042");
        assert_eq!(OrderNumber::format(OrderType::Sale, 1_000_000).as_str(), "SO-1000000");
    }

    #[test]
    fn parse_recovers_type_and_sequence() {
        assert_eq!(OrderNumber::parse("SO-000017").unwrap(), (OrderType::Sale, 17));
        assert_eq!(OrderNumber::parse("PO-1000000").unwrap(), (OrderType::Purchase, 1_000_000));
        let number: OrderNumber = "PO-000003".parse().unwrap();
        assert_eq!(number.order_type(), OrderType::Purchase);
    }

    #[test]
    fn deserialization_goes_through_parse() {
        let number: OrderNumber = serde_json::from_str("\"PO-000042\"").unwrap();
        assert_eq!(number.order_type(), OrderType::Purchase);
        assert_eq!(serde_json::to_string(&number).unwrap(), "\"PO-000042\"");

        for bad in ["\"XX-000001\"", "\"SO-12\"", "\"anything\""] {
            assert!(serde_json::from_str::<OrderNumber>(bad).is_err(), "{bad} deserialized");
        }
    }

    #[test]
    fn parse_rejects_malformed_numbers() {
        for bad in ["", "SO", "SO-", "SO-12", "XX-000001", "SO-00001a", "SO-000000", "SO-0000001", "so-000001"] {
            assert!(
                matches!(OrderNumber::parse(bad), Err(DomainError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn allocator_retries_transient_failures() {
        let source = FlakySource::new(2);
        let allocator = SequenceAllocator::new(&source, 5);
        assert_eq!(allocator.next(OrderType::Sale).unwrap().as_str(), "SO-000001");
        assert_eq!(source.calls.get(), 3);
        assert_eq!(allocator.next(OrderType::Sale).unwrap().as_str(), "SO-000002");
    }

    #[test]
    fn allocator_gives_up_after_budget() {
        let source = FlakySource::new(10);
        let allocator = SequenceAllocator::new(&source, 3);
        let err = allocator.next(OrderType::Purchase).unwrap_err();
        assert_eq!(
            err,
            DomainError::AllocationExhausted {
                order_type: "purchase".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(source.calls.get(), 3);
    }

    #[test]
    fn unavailable_source_is_not_retried() {
        let allocator = SequenceAllocator::new(&DownSource, 5);
        assert!(matches!(
            allocator.next(OrderType::Sale),
            Err(DomainError::AllocationExhausted { attempts: 1, .. })
        ));
    }
}
