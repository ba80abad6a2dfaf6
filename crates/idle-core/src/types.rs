//! Core type definitions with validation.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The settle timeout was zero.
    #[error("settle timeout must be greater than 0")]
    ZeroSettleTimeout,
}

/// How long the outstanding count must stay at zero before a resource
/// reports itself idle.
///
/// Always strictly positive. Serialized as whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct SettleTimeout(Duration);

impl SettleTimeout {
    /// Creates a settle timeout after validation.
    ///
    /// Returns an error if `duration` is zero.
    pub const fn new(duration: Duration) -> Result<Self, ValidationError> {
        if duration.is_zero() {
            return Err(ValidationError::ZeroSettleTimeout);
        }
        Ok(Self(duration))
    }

    /// Creates a settle timeout from milliseconds.
    pub const fn from_millis(millis: u64) -> Result<Self, ValidationError> {
        Self::new(Duration::from_millis(millis))
    }

    /// Returns the inner duration.
    #[must_use]
    pub const fn get(self) -> Duration {
        self.0
    }

    /// Returns the timeout in milliseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn as_millis(self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for SettleTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

impl TryFrom<Duration> for SettleTimeout {
    type Error = ValidationError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<u64> for SettleTimeout {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_millis(value)
    }
}

impl From<SettleTimeout> for Duration {
    fn from(timeout: SettleTimeout) -> Self {
        timeout.0
    }
}

impl From<SettleTimeout> for u64 {
    fn from(timeout: SettleTimeout) -> Self {
        timeout.as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_timeout_rejects_zero() {
        assert_eq!(
            SettleTimeout::new(Duration::ZERO),
            Err(ValidationError::ZeroSettleTimeout)
        );
        assert!(SettleTimeout::from_millis(0).is_err());
    }

    #[test]
    fn settle_timeout_accepts_positive() {
        let timeout = SettleTimeout::new(Duration::from_nanos(1)).unwrap();
        assert_eq!(timeout.get(), Duration::from_nanos(1));

        let timeout = SettleTimeout::from_millis(250).unwrap();
        assert_eq!(timeout.get(), Duration::from_millis(250));
        assert_eq!(timeout.as_millis(), 250);
    }

    #[test]
    fn settle_timeout_display() {
        let timeout = SettleTimeout::from_millis(1500).unwrap();
        assert_eq!(timeout.to_string(), "1500ms");
    }

    #[test]
    fn settle_timeout_serde_roundtrip() {
        let timeout = SettleTimeout::from_millis(300).unwrap();
        let json = serde_json::to_string(&timeout).unwrap();
        assert_eq!(json, "300");
        let parsed: SettleTimeout = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, timeout);
    }

    #[test]
    fn settle_timeout_serde_rejects_zero() {
        let result: Result<SettleTimeout, _> = serde_json::from_str("0");
        assert!(result.is_err());
    }

    #[test]
    fn validation_error_message() {
        assert_eq!(
            ValidationError::ZeroSettleTimeout.to_string(),
            "settle timeout must be greater than 0"
        );
    }
}
