use serde::{Deserialize, Serialize};
use validator::Validate;

use super::TransactionService;
use crate::actor::{Actor, ActorSnapshot, Credential, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionMethod, TransactionType};

/// Debit a balance for a purchase settled outside the ledger
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeductRequest {
    pub balance_id: BalanceId,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    /// Merchant or corporate receiving the deduction
    #[validate(length(min = 1))]
    pub merchant_name: String,
    #[serde(default)]
    pub description: String,
    pub credential: Credential,
}

impl TransactionService {
    pub async fn deduct(
        &self,
        actor: &dyn Actor,
        req: DeductRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let balance = self
            .authorized_balance(actor, Some(&req.credential), &req.balance_id)
            .await?;
        if let Some(existing) = self
            .existing(&balance.corporate_id, &balance.id, TransactionType::Deduct, &req.external_id)
            .await?
        {
            return Ok(existing);
        }
        self.limits.deduct.check(req.amount)?;

        let mut transaction = Transaction::new(
            TransactionType::Deduct,
            TransactionMethod::Balance,
            balance.corporate_id.clone(),
            actor.snapshot(&balance),
            ActorSnapshot::new(
                PartyType::Merchant,
                balance.corporate_id.as_str(),
                req.merchant_name.as_str(),
                "",
            ),
            balance.currency.clone(),
            req.external_id.clone(),
        );
        transaction.source_balance_id = Some(balance.id.clone());
        transaction.sub_amount = req.amount;
        transaction.description = if req.description.is_empty() {
            format!("Payment to {}", req.merchant_name)
        } else {
            req.description.clone()
        };

        let primary = vec![Statement::withdraw(
            balance.id.clone(),
            transaction.sub_amount,
            transaction.code.clone(),
            transaction.description.as_str(),
            StatementType::Transaction,
            transaction.created_at,
        )];
        let transaction = self.charge(actor.kind(), transaction, primary).await?;
        self.settled(&transaction);
        Ok(transaction)
    }
}
