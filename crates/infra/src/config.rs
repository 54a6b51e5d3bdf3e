//! Coordinator configuration, read from `STOCKFLOW_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const MAX_RETRIES: &str = "STOCKFLOW_MAX_RETRIES";
pub const RETRY_BASE_MS: &str = "STOCKFLOW_RETRY_BASE_MS";
pub const RETRY_MAX_MS: &str = "STOCKFLOW_RETRY_MAX_MS";
pub const LOCK_WAIT_MS: &str = "STOCKFLOW_LOCK_WAIT_MS";
pub const OPERATION_TIMEOUT_MS: &str = "STOCKFLOW_OPERATION_TIMEOUT_MS";
pub const SEQUENCE_ATTEMPTS: &str = "STOCKFLOW_SEQUENCE_ATTEMPTS";
pub const FULFILLMENT_BACKORDER: &str = "STOCKFLOW_FULFILLMENT_BACKORDER";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    pub lock_wait: Duration,
    pub operation_timeout: Duration,
    pub sequence_attempts: u32,
    /// Let fulfillment stock-outs drive on-hand quantity negative.
    pub fulfillment_backorder: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::exponential(5, Duration::from_millis(5), Duration::from_millis(200)),
            lock_wait: Duration::from_millis(250),
            operation_timeout: Duration::from_millis(5000),
            sequence_attempts: 5,
            fulfillment_backorder: false,
        }
    }
}

impl CoordinatorConfig {
    /// Read from the process environment; unset variables keep their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
            .context("failed to load coordinator configuration from environment")
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_retries = parse_or(&lookup, MAX_RETRIES, defaults.retry.max_retries)?;
        let base_ms = parse_or(&lookup, RETRY_BASE_MS, defaults.retry.base_delay.as_millis() as u64)?;
        let max_ms = parse_or(&lookup, RETRY_MAX_MS, defaults.retry.max_delay.as_millis() as u64)?;
        if max_ms < base_ms {
            return Err(ConfigError::Invalid {
                var: RETRY_MAX_MS,
                value: max_ms.to_string(),
                reason: format!("must be at least {RETRY_BASE_MS} ({base_ms})"),
            });
        }

        let lock_wait_ms = parse_or(&lookup, LOCK_WAIT_MS, defaults.lock_wait.as_millis() as u64)?;
        let timeout_ms = parse_or(
            &lookup,
            OPERATION_TIMEOUT_MS,
            defaults.operation_timeout.as_millis() as u64,
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: OPERATION_TIMEOUT_MS,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let sequence_attempts = parse_or(&lookup, SEQUENCE_ATTEMPTS, defaults.sequence_attempts)?;
        if sequence_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: SEQUENCE_ATTEMPTS,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let fulfillment_backorder =
            parse_or(&lookup, FULFILLMENT_BACKORDER, defaults.fulfillment_backorder)?;

        Ok(Self {
            retry: RetryPolicy::exponential(
                max_retries,
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
            lock_wait: Duration::from_millis(lock_wait_ms),
            operation_timeout: Duration::from_millis(timeout_ms),
            sequence_attempts,
            fulfillment_backorder,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
