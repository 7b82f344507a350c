//! Balance and Statement records
//!
//! These shapes are the durable contract read directly by reporting and
//! reconciliation services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::ActorKind;
use crate::core_types::{ActorId, Amount, BalanceId, CorporateId, StatementId, TransactionCode};
use crate::error::LedgerError;

/// A named monetary account in a single currency.
///
/// `amount` only changes through [`crate::ledger::StatementLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub id: BalanceId,
    pub corporate_id: CorporateId,
    pub owner_type: ActorKind,
    pub owner_id: ActorId,
    pub name: String,
    pub amount: Amount,
    pub currency: String,
    /// Routable deposit account numbers (virtual accounts)
    pub account_numbers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Open an empty balance
    pub fn open(
        id: BalanceId,
        corporate_id: CorporateId,
        owner_type: ActorKind,
        owner_id: ActorId,
        name: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            corporate_id,
            owner_type,
            owner_id,
            name: name.into(),
            amount: 0,
            currency: currency.into(),
            account_numbers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_account_numbers(mut self, account_numbers: Vec<String>) -> Self {
        self.account_numbers = account_numbers;
        self
    }
}

/// Statement type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum StatementType {
    Transaction = 1,
    Fee = 2,
}

impl StatementType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(StatementType::Transaction),
            2 => Some(StatementType::Fee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Transaction => "TRANSACTION",
            StatementType::Fee => "FEE",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable audit record of one withdraw or deposit against one balance.
///
/// Exactly one of `withdraw` / `deposit` is non-zero. `balance` is the
/// owning balance's amount right after this statement was applied; it is
/// zero on a draft that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub balance_id: BalanceId,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub reference: TransactionCode,
    pub withdraw: Amount,
    pub deposit: Amount,
    pub balance: Amount,
    pub statement_type: StatementType,
}

impl Statement {
    pub fn withdraw(
        balance_id: BalanceId,
        amount: Amount,
        reference: TransactionCode,
        description: impl Into<String>,
        statement_type: StatementType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StatementId::generate(),
            balance_id,
            created_at,
            description: description.into(),
            reference,
            withdraw: amount,
            deposit: 0,
            balance: 0,
            statement_type,
        }
    }

    pub fn deposit(
        balance_id: BalanceId,
        amount: Amount,
        reference: TransactionCode,
        description: impl Into<String>,
        statement_type: StatementType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StatementId::generate(),
            balance_id,
            created_at,
            description: description.into(),
            reference,
            withdraw: 0,
            deposit: amount,
            balance: 0,
            statement_type,
        }
    }

    /// Withdraw on `source` and deposit on `destination`, same reference and timestamp.
    pub fn transfer_pair(
        source: BalanceId,
        destination: BalanceId,
        amount: Amount,
        reference: TransactionCode,
        description: &str,
        statement_type: StatementType,
        created_at: DateTime<Utc>,
    ) -> [Statement; 2] {
        [
            Statement::withdraw(
                source,
                amount,
                reference.clone(),
                description,
                statement_type,
                created_at,
            ),
            Statement::deposit(
                destination,
                amount,
                reference,
                description,
                statement_type,
                created_at,
            ),
        ]
    }

    #[inline]
    pub fn is_withdraw(&self) -> bool {
        self.withdraw > 0
    }

    /// The non-zero side of the statement
    #[inline]
    pub fn amount(&self) -> Amount {
        self.withdraw.max(self.deposit)
    }

    /// Signed effect on the owning balance
    #[inline]
    pub fn delta(&self) -> Amount {
        self.deposit - self.withdraw
    }

    /// Inverse draft: withdraw and deposit swapped, same amount and reference.
    pub fn reversed(&self, created_at: DateTime<Utc>) -> Statement {
        Statement {
            id: StatementId::generate(),
            balance_id: self.balance_id.clone(),
            created_at,
            description: format!("Rollback: {}", self.description),
            reference: self.reference.clone(),
            withdraw: self.deposit,
            deposit: self.withdraw,
            balance: 0,
            statement_type: self.statement_type,
        }
    }

    /// Exactly one side must be positive.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.withdraw < 0 || self.deposit < 0 {
            return Err(LedgerError::InvalidStatement(format!(
                "negative amount on statement {}",
                self.id
            )));
        }
        match (self.withdraw > 0, self.deposit > 0) {
            (true, false) | (false, true) => Ok(()),
            _ => Err(LedgerError::InvalidStatement(format!(
                "statement {} must carry exactly one of withdraw/deposit",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> TransactionCode {
        TransactionCode::new("TRW01")
    }

    #[test]
    fn test_transfer_pair_shares_reference_and_timestamp() {
        let now = Utc::now();
        let [out, inn] = Statement::transfer_pair(
            BalanceId::new("a"),
            BalanceId::new("b"),
            500,
            code(),
            "Transfer",
            StatementType::Transaction,
            now,
        );
        assert_eq!(out.reference, inn.reference);
        assert_eq!(out.created_at, inn.created_at);
        assert_eq!(out.delta(), -500);
        assert_eq!(inn.delta(), 500);
        assert_eq!(out.amount(), inn.amount());
    }

    #[test]
    fn test_reversed_swaps_sides() {
        let s = Statement::withdraw(
            BalanceId::new("a"),
            1_000,
            code(),
            "Fee",
            StatementType::Fee,
            Utc::now(),
        );
        let r = s.reversed(Utc::now());
        assert_eq!(r.deposit, 1_000);
        assert_eq!(r.withdraw, 0);
        assert_eq!(r.reference, s.reference);
        assert_eq!(r.statement_type, StatementType::Fee);
        assert_ne!(r.id, s.id);
    }

    #[test]
    fn test_validate_rejects_zero_and_double_sided() {
        let mut s = Statement::deposit(
            BalanceId::new("a"),
            0,
            code(),
            "x",
            StatementType::Transaction,
            Utc::now(),
        );
        assert!(s.validate().is_err());
        s.deposit = 10;
        s.withdraw = 10;
        assert!(s.validate().is_err());
        s.withdraw = 0;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_statement_type_ids() {
        assert_eq!(StatementType::from_id(1), Some(StatementType::Transaction));
        assert_eq!(StatementType::from_id(2), Some(StatementType::Fee));
        assert_eq!(StatementType::from_id(3), None);
        assert_eq!(StatementType::Fee.to_string(), "FEE");
    }
}
