//! Fee Calculator
//!
//! Fee schedules are per corporate, per transaction type, per actor kind.
//! A rule is either a flat amount or a percentage of the sub-amount given
//! as a decimal string (`"0.025"` = 2.5%), floored to the smallest unit.
//!
//! A fee is always a withdraw from the paying balance plus a deposit into
//! the corporate's fee-collection balance, both tagged `FEE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::actor::ActorKind;
use crate::core_types::{Amount, BalanceId, CorporateId, TransactionCode};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeeRule {
    Flat(Amount),
    /// Fraction of the sub-amount, as a decimal string
    Percentage(String),
}

impl FeeRule {
    pub fn amount_for(&self, sub_amount: Amount) -> Result<Amount, LedgerError> {
        match self {
            FeeRule::Flat(fee) if *fee < 0 => Err(LedgerError::FeeConfiguration(format!(
                "negative flat fee {}",
                fee
            ))),
            FeeRule::Flat(fee) => Ok(*fee),
            FeeRule::Percentage(rate) => percentage_fee(sub_amount, rate),
        }
    }
}

/// `floor(sub_amount * rate)`
pub fn percentage_fee(sub_amount: Amount, rate: &str) -> Result<Amount, LedgerError> {
    let rate = Decimal::from_str(rate.trim()).map_err(|e| {
        LedgerError::FeeConfiguration(format!("invalid percentage rate '{}': {}", rate, e))
    })?;
    if rate.is_sign_negative() {
        return Err(LedgerError::FeeConfiguration(format!(
            "negative percentage rate {}",
            rate
        )));
    }
    Decimal::from(sub_amount)
        .checked_mul(rate)
        .map(|fee| fee.floor())
        .and_then(|fee| fee.to_i64())
        .ok_or(LedgerError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub transaction_type: TransactionType,
    pub actor_kind: ActorKind,
    pub rule: FeeRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub corporate_id: CorporateId,
    /// Balance that collects every fee of this corporate
    pub fee_balance_id: BalanceId,
    #[serde(default)]
    pub entries: Vec<FeeEntry>,
}

impl FeeSchedule {
    pub fn rule_for(
        &self,
        transaction_type: TransactionType,
        actor_kind: ActorKind,
    ) -> Option<&FeeRule> {
        self.entries
            .iter()
            .find(|e| e.transaction_type == transaction_type && e.actor_kind == actor_kind)
            .map(|e| &e.rule)
    }
}

/// Corporate fee-schedule lookup, owned by the corporate settings service.
#[async_trait]
pub trait FeeScheduleProvider: Send + Sync {
    async fn fee_schedule(
        &self,
        corporate_id: &CorporateId,
    ) -> Result<Option<FeeSchedule>, LedgerError>;
}

/// Fee schedules loaded once from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFeeSchedules {
    schedules: FxHashMap<CorporateId, FeeSchedule>,
}

impl StaticFeeSchedules {
    pub fn new(schedules: Vec<FeeSchedule>) -> Self {
        Self {
            schedules: schedules
                .into_iter()
                .map(|s| (s.corporate_id.clone(), s))
                .collect(),
        }
    }
}

#[async_trait]
impl FeeScheduleProvider for StaticFeeSchedules {
    async fn fee_schedule(
        &self,
        corporate_id: &CorporateId,
    ) -> Result<Option<FeeSchedule>, LedgerError> {
        Ok(self.schedules.get(corporate_id).cloned())
    }
}

/// Fee computation bound to one transaction
pub struct FeeCalculator {
    schedule: Option<FeeSchedule>,
    actor_kind: ActorKind,
    payer: BalanceId,
    code: TransactionCode,
    transaction_type: TransactionType,
    sub_amount: Amount,
    created_at: DateTime<Utc>,
}

impl FeeCalculator {
    /// Bind the schedule, the acting actor kind, the paying balance and the
    /// transaction being charged.
    pub fn initialize(
        schedule: Option<FeeSchedule>,
        actor_kind: ActorKind,
        payer: &BalanceId,
        transaction: &Transaction,
    ) -> Self {
        Self {
            schedule,
            actor_kind,
            payer: payer.clone(),
            code: transaction.code.clone(),
            transaction_type: transaction.transaction_type,
            sub_amount: transaction.sub_amount,
            created_at: transaction.created_at,
        }
    }

    /// Fee for the bound transaction; zero without a matching rule.
    pub fn fee_amount(&self) -> Result<Amount, LedgerError> {
        let Some(schedule) = &self.schedule else {
            return Ok(0);
        };
        if schedule.fee_balance_id == self.payer {
            return Ok(0);
        }
        match schedule.rule_for(self.transaction_type, self.actor_kind) {
            Some(rule) => rule.amount_for(self.sub_amount),
            None => Ok(0),
        }
    }

    /// Statements moving the fee from the payer to the fee balance.
    ///
    /// Empty when the fee is zero.
    pub fn calculate_by_owner_and_transaction(&self) -> Result<Vec<Statement>, LedgerError> {
        let fee = self.fee_amount()?;
        let Some(schedule) = &self.schedule else {
            return Ok(Vec::new());
        };
        if fee == 0 {
            return Ok(Vec::new());
        }
        let description = format!("Fee {}", self.transaction_type.as_str().to_lowercase());
        Ok(Statement::transfer_pair(
            self.payer.clone(),
            schedule.fee_balance_id.clone(),
            fee,
            self.code.clone(),
            &description,
            StatementType::Fee,
            self.created_at,
        )
        .to_vec())
    }

    /// Inverse of a fee statement set: sides swapped, amounts and
    /// references kept, applied in reverse order.
    pub fn rollback_fee_statements(statements: &[Statement]) -> Vec<Statement> {
        let now = Utc::now();
        statements
            .iter()
            .filter(|s| s.statement_type == StatementType::Fee)
            .rev()
            .map(|s| s.reversed(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorSnapshot, PartyType};
    use crate::transaction::TransactionMethod;

    fn schedule() -> FeeSchedule {
        FeeSchedule {
            corporate_id: CorporateId::new("c1"),
            fee_balance_id: BalanceId::new("fees"),
            entries: vec![
                FeeEntry {
                    transaction_type: TransactionType::TransferToBank,
                    actor_kind: ActorKind::User,
                    rule: FeeRule::Flat(1_000),
                },
                FeeEntry {
                    transaction_type: TransactionType::TransferToBank,
                    actor_kind: ActorKind::Corporate,
                    rule: FeeRule::Flat(2_500),
                },
                FeeEntry {
                    transaction_type: TransactionType::AcceptCard,
                    actor_kind: ActorKind::Corporate,
                    rule: FeeRule::Percentage("0.025".into()),
                },
            ],
        }
    }

    fn transaction(transaction_type: TransactionType, sub_amount: Amount) -> Transaction {
        let mut t = Transaction::new(
            transaction_type,
            TransactionMethod::Bank,
            CorporateId::new("c1"),
            ActorSnapshot::new(PartyType::User, "c1", "Ana", "1"),
            ActorSnapshot::new(PartyType::Bank, "014", "Budi", "2"),
            "IDR",
            "ext",
        );
        t.sub_amount = sub_amount;
        t
    }

    #[test]
    fn test_percentage_fee_floors() {
        assert_eq!(percentage_fee(10_000, "0.025").unwrap(), 250);
        assert_eq!(percentage_fee(999, "0.025").unwrap(), 24);
        assert_eq!(percentage_fee(10_000, "0").unwrap(), 0);
    }

    #[test]
    fn test_bad_rate_is_configuration_error() {
        let err = percentage_fee(10_000, "two percent").unwrap_err();
        assert!(matches!(err, LedgerError::FeeConfiguration(_)));
        let err = percentage_fee(10_000, "-0.1").unwrap_err();
        assert!(matches!(err, LedgerError::FeeConfiguration(_)));
    }

    #[test]
    fn test_actor_kind_branch() {
        let t = transaction(TransactionType::TransferToBank, 30_000);
        let payer = BalanceId::new("a");
        let user = FeeCalculator::initialize(Some(schedule()), ActorKind::User, &payer, &t);
        let corp = FeeCalculator::initialize(Some(schedule()), ActorKind::Corporate, &payer, &t);
        assert_eq!(user.fee_amount().unwrap(), 1_000);
        assert_eq!(corp.fee_amount().unwrap(), 2_500);
    }

    #[test]
    fn test_fee_statements_move_fee_to_fee_balance() {
        let t = transaction(TransactionType::TransferToBank, 30_000);
        let calc =
            FeeCalculator::initialize(Some(schedule()), ActorKind::User, &BalanceId::new("a"), &t);
        let statements = calc.calculate_by_owner_and_transaction().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].balance_id, BalanceId::new("a"));
        assert_eq!(statements[0].withdraw, 1_000);
        assert_eq!(statements[1].balance_id, BalanceId::new("fees"));
        assert_eq!(statements[1].deposit, 1_000);
        assert!(statements.iter().all(|s| s.statement_type == StatementType::Fee));
        assert!(statements.iter().all(|s| s.reference == t.code));
    }

    #[test]
    fn test_no_rule_no_statements() {
        let t = transaction(TransactionType::Topup, 30_000);
        let calc =
            FeeCalculator::initialize(Some(schedule()), ActorKind::User, &BalanceId::new("a"), &t);
        assert!(calc.calculate_by_owner_and_transaction().unwrap().is_empty());
        let calc = FeeCalculator::initialize(None, ActorKind::User, &BalanceId::new("a"), &t);
        assert_eq!(calc.fee_amount().unwrap(), 0);
    }

    #[test]
    fn test_rollback_swaps_sides() {
        let t = transaction(TransactionType::TransferToBank, 30_000);
        let calc =
            FeeCalculator::initialize(Some(schedule()), ActorKind::User, &BalanceId::new("a"), &t);
        let charged = calc.calculate_by_owner_and_transaction().unwrap();
        let rollback = FeeCalculator::rollback_fee_statements(&charged);
        assert_eq!(rollback.len(), 2);
        // Fee balance gives back first, then the payer is credited
        assert_eq!(rollback[0].balance_id, BalanceId::new("fees"));
        assert_eq!(rollback[0].withdraw, 1_000);
        assert_eq!(rollback[1].balance_id, BalanceId::new("a"));
        assert_eq!(rollback[1].deposit, 1_000);
        assert!(rollback.iter().all(|s| s.reference == t.code));
    }

    #[test]
    fn test_schedule_yaml() {
        let yaml = r#"
corporate_id: c1
fee_balance_id: fees
entries:
  - transaction_type: ACCEPT_CARD
    actor_kind: CORPORATE
    rule: { kind: percentage, value: "0.02" }
  - transaction_type: TOPUP
    actor_kind: USER
    rule: { kind: flat, value: 500 }
"#;
        let s: FeeSchedule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.entries.len(), 2);
        assert_eq!(
            s.rule_for(TransactionType::Topup, ActorKind::User),
            Some(&FeeRule::Flat(500))
        );
    }
}
