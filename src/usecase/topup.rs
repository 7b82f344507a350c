use serde::{Deserialize, Serialize};
use validator::Validate;

use super::TransactionService;
use super::validation::net_of_fee;
use crate::actor::{ActorSnapshot, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionMethod, TransactionType};

/// Funds arriving from outside, typically a virtual-account payment
/// reported by the bank.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TopupRequest {
    pub balance_id: BalanceId,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    /// Bank the funds came through
    pub institution: String,
    /// Virtual account number that received the funds
    pub account_number: String,
    #[serde(default)]
    pub description: String,
}

impl TransactionService {
    /// Credit an external payment into a balance, net of the topup fee.
    pub async fn topup(&self, req: TopupRequest) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let balance = self.load_balance(&req.balance_id).await?;
        if let Some(existing) = self
            .existing(&balance.corporate_id, &balance.id, TransactionType::Topup, &req.external_id)
            .await?
        {
            return Ok(existing);
        }
        self.limits.topup.check(req.amount)?;

        let mut transaction = Transaction::new(
            TransactionType::Topup,
            TransactionMethod::VirtualAccount,
            balance.corporate_id.clone(),
            ActorSnapshot::new(
                PartyType::Bank,
                req.institution.as_str(),
                req.institution.as_str(),
                req.account_number.as_str(),
            ),
            ActorSnapshot::of_balance(balance.owner_type.into(), &balance.name, &balance),
            balance.currency.clone(),
            req.external_id.clone(),
        );
        transaction.destination_balance_id = Some(balance.id.clone());
        transaction.sub_amount = req.amount;
        transaction.description = if req.description.is_empty() {
            format!("Topup via {}", req.institution)
        } else {
            req.description.clone()
        };

        let (fee, fees) = self
            .fee_statements(balance.owner_type, &balance.id, &transaction)
            .await?;
        transaction.total_fee = fee;
        transaction.amount = net_of_fee(transaction.sub_amount, transaction.total_fee)?;

        let mut statements = vec![Statement::deposit(
            balance.id.clone(),
            transaction.sub_amount,
            transaction.code.clone(),
            transaction.description.as_str(),
            StatementType::Transaction,
            transaction.created_at,
        )];
        statements.extend(fees);

        let transaction = self.record(statements, transaction).await?;
        self.settled(&transaction);
        Ok(transaction)
    }
}
