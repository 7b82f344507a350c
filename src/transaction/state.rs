//! Transaction status and provider-reported status
//!
//! Status IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction status
///
/// `Pending -> Completed` or `Pending -> Failed`. A provider refund on a
/// completed bank transfer moves it back to `Pending` for the failover loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Local reservation committed, provider outcome unknown
    Pending = 0,

    /// Terminal: money reached its destination
    Completed = 10,

    /// Terminal: every provider failed, source restitution is due
    Failed = -10,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Completed),
            -10 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// Normalized provider status
///
/// Every provider integration maps its own vocabulary onto these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Pending,
    Completed,
    Failed,
    /// Provider reversed a transfer; treated like a failure of that attempt
    Refund,
}

impl ProviderStatus {
    /// Failed and Refund both advance the strategy queue
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, ProviderStatus::Failed | ProviderStatus::Refund)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Pending => "PENDING",
            ProviderStatus::Completed => "COMPLETED",
            ProviderStatus::Failed => "FAILED",
            ProviderStatus::Refund => "REFUND",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_id_roundtrip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::from_id(status.id()), Some(status));
        }
        assert!(TransactionStatus::from_id(999).is_none());
        assert!(TransactionStatus::try_from(-30).is_err());
    }

    #[test]
    fn test_provider_failure_classes() {
        assert!(ProviderStatus::Failed.is_failure());
        assert!(ProviderStatus::Refund.is_failure());
        assert!(!ProviderStatus::Pending.is_failure());
        assert!(!ProviderStatus::Completed.is_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionStatus::Pending.to_string(), "PENDING");
        assert_eq!(ProviderStatus::Refund.to_string(), "REFUND");
    }
}
