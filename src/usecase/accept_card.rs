use serde::{Deserialize, Serialize};
use validator::Validate;

use super::TransactionService;
use super::validation::net_of_fee;
use crate::actor::{Actor, ActorSnapshot, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionMethod, TransactionType};

/// Card payment accepted by a merchant into its balance
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcceptCardRequest {
    pub balance_id: BalanceId,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    /// Card network or issuer
    #[validate(length(min = 1))]
    pub issuer: String,
    /// Masked PAN as printed on the receipt
    #[validate(length(min = 4))]
    pub masked_pan: String,
    #[serde(default)]
    pub cardholder_name: String,
    #[serde(default)]
    pub description: String,
}

impl TransactionService {
    /// Credit a card payment, net of the acquiring fee.
    ///
    /// The actor accepts into a balance it can access; no PIN is involved.
    pub async fn accept_card(
        &self,
        actor: &dyn Actor,
        req: AcceptCardRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let balance = self
            .authorized_balance(actor, None, &req.balance_id)
            .await?;
        if let Some(existing) = self
            .existing(&balance.corporate_id, &balance.id, TransactionType::AcceptCard, &req.external_id)
            .await?
        {
            return Ok(existing);
        }
        self.limits.accept_card.check(req.amount)?;

        let mut transaction = Transaction::new(
            TransactionType::AcceptCard,
            TransactionMethod::Card,
            balance.corporate_id.clone(),
            ActorSnapshot::new(
                PartyType::Card,
                req.issuer.as_str(),
                req.cardholder_name.as_str(),
                req.masked_pan.as_str(),
            ),
            actor.snapshot(&balance),
            balance.currency.clone(),
            req.external_id.clone(),
        );
        transaction.destination_balance_id = Some(balance.id.clone());
        transaction.sub_amount = req.amount;
        transaction.description = if req.description.is_empty() {
            format!("Card payment {}", req.masked_pan)
        } else {
            req.description.clone()
        };

        let (fee, fees) = self
            .fee_statements(actor.kind(), &balance.id, &transaction)
            .await?;
        transaction.total_fee = fee;
        transaction.amount = net_of_fee(transaction.sub_amount, fee)?;

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
