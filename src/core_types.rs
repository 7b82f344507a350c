//! Core types used throughout the ledger
//!
//! Identifiers are string newtypes: balances, actors and corporates are
//! provisioned by external services, so the ledger never mints them.
//! Transaction codes and statement ids are minted here from ULIDs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in the smallest currency unit.
///
/// Signed so that arithmetic on deltas stays explicit, but every persisted
/// balance amount is `>= 0`.
pub type Amount = i64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Balance identifier - one per actor, plus shared sub-balances
    BalanceId
);

string_id!(
    /// Corporate (tenant) identifier
    CorporateId
);

string_id!(
    /// Actor identifier (end user or corporate operator)
    ActorId
);

string_id!(
    /// Payment provider code, e.g. `xendit`
    ProviderCode
);

string_id!(
    /// Transaction code - globally unique, also the statement reference
    TransactionCode
);

string_id!(
    /// Statement identifier
    StatementId
);

string_id!(
    /// Bulk transfer / bulk inquiry identifier
    BulkId
);

impl TransactionCode {
    /// Mint a new code: `<prefix><ULID>`.
    ///
    /// ULIDs are monotonic within a millisecond, so codes sort by creation.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}{}", prefix, ulid::Ulid::new()))
    }
}

impl StatementId {
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl BulkId {
    pub fn generate() -> Self {
        Self(format!("BLK{}", ulid::Ulid::new()))
    }
}
