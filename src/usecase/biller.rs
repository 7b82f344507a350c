use serde::{Deserialize, Serialize};
use validator::Validate;

use super::TransactionService;
use crate::actor::{Actor, ActorSnapshot, Credential, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionMethod, TransactionType};

/// Bill payment. The biller aggregator confirms synchronously before the
/// request reaches the ledger, so the transaction completes on commit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BillerRequest {
    pub balance_id: BalanceId,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    #[validate(length(min = 1))]
    pub biller_code: String,
    #[validate(length(min = 1))]
    pub customer_number: String,
    #[serde(default)]
    pub biller_name: String,
    #[serde(default)]
    pub description: String,
    pub credential: Credential,
}

impl TransactionService {
    pub async fn pay_biller(
        &self,
        actor: &dyn Actor,
        req: BillerRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let balance = self
            .authorized_balance(actor, Some(&req.credential), &req.balance_id)
            .await?;
        if let Some(existing) = self
            .existing(&balance.corporate_id, &balance.id, TransactionType::Biller, &req.external_id)
            .await?
        {
            return Ok(existing);
        }
        self.limits.biller.check(req.amount)?;

        let mut transaction = Transaction::new(
            TransactionType::Biller,
            TransactionMethod::Biller,
            balance.corporate_id.clone(),
            actor.snapshot(&balance),
            ActorSnapshot::new(
                PartyType::Biller,
                req.biller_code.as_str(),
                req.biller_name.as_str(),
                req.customer_number.as_str(),
            ),
            balance.currency.clone(),
            req.external_id.clone(),
        );
        transaction.source_balance_id = Some(balance.id.clone());
        transaction.sub_amount = req.amount;
        transaction.description = if req.description.is_empty() {
            format!("Bill {} {}", req.biller_code, req.customer_number)
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
