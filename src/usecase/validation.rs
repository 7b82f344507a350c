//! Operation validation
//!
//! Everything here runs before a unit of work is started: a failure means
//! nothing was committed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actor::{Actor, Credential, CredentialVerifier};
use crate::core_types::Amount;
use crate::error::LedgerError;
use crate::ledger::Balance;

/// Inclusive amount bounds of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountLimits {
    pub min: Amount,
    pub max: Amount,
}

impl AmountLimits {
    pub const fn new(min: Amount, max: Amount) -> Self {
        Self { min, max }
    }

    pub fn check(&self, amount: Amount) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if amount < self.min {
            return Err(LedgerError::AmountTooSmall { min: self.min });
        }
        if amount > self.max {
            return Err(LedgerError::AmountTooLarge { max: self.max });
        }
        Ok(())
    }
}

/// Per-operation amount bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionLimits {
    pub topup: AmountLimits,
    pub deduct: AmountLimits,
    pub transfer_balance: AmountLimits,
    pub transfer_cash: AmountLimits,
    pub transfer_bank: AmountLimits,
    pub pay_qr: AmountLimits,
    pub biller: AmountLimits,
    pub accept_card: AmountLimits,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            topup: AmountLimits::new(10_000, 100_000_000),
            deduct: AmountLimits::new(1, 100_000_000),
            transfer_balance: AmountLimits::new(1, 100_000_000),
            transfer_cash: AmountLimits::new(10_000, 10_000_000),
            transfer_bank: AmountLimits::new(10_000, 100_000_000),
            pay_qr: AmountLimits::new(1, 10_000_000),
            biller: AmountLimits::new(1, 100_000_000),
            accept_card: AmountLimits::new(1_000, 100_000_000),
        }
    }
}

/// Verified status, credential, then balance access.
///
/// `credential` is `None` for operations that need no PIN, such as card
/// acceptance into the actor's own balance.
pub async fn authorize(
    verifier: &dyn CredentialVerifier,
    actor: &dyn Actor,
    credential: Option<&Credential>,
    balance: &Balance,
) -> Result<(), LedgerError> {
    if !actor.is_verified() {
        return Err(LedgerError::UnverifiedActor);
    }
    if let Some(credential) = credential
        && !verifier.verify(actor, credential).await?
    {
        debug!(actor = %actor.id(), "Credential rejected");
        return Err(LedgerError::InvalidPin);
    }
    if !actor.can_access_balance(balance) {
        return Err(LedgerError::BalanceAccessDenied(balance.id.clone()));
    }
    Ok(())
}

pub fn check_currency(source: &Balance, destination: &Balance) -> Result<(), LedgerError> {
    if source.currency != destination.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: source.currency.clone(),
            actual: destination.currency.clone(),
        });
    }
    Ok(())
}

/// Incoming operations credit `sub_amount - fee`
pub fn net_of_fee(sub_amount: Amount, fee: Amount) -> Result<Amount, LedgerError> {
    if fee > sub_amount {
        return Err(LedgerError::FeeExceedsAmount);
    }
    Ok(sub_amount - fee)
}

/// Outgoing operations debit `sub_amount + fee`
pub fn gross_of_fee(sub_amount: Amount, fee: Amount) -> Result<Amount, LedgerError> {
    sub_amount.checked_add(fee).ok_or(LedgerError::Overflow)
}
