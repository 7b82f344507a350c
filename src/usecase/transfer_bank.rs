use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::TransactionService;
use crate::actor::{Actor, ActorKind, ActorSnapshot, Credential, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::tasks::Task;
use crate::transaction::{
    BankDestination, Transaction, TransactionMethod, TransactionStatus, TransactionType,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferBankRequest {
    pub source_balance_id: BalanceId,
    #[validate(length(min = 1))]
    pub bank_code: String,
    #[validate(length(min = 1))]
    pub account_number: String,
    #[validate(length(min = 1))]
    pub account_name: String,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    #[serde(default)]
    pub description: String,
    pub credential: Credential,
}

/// An already-authorized bank transfer
#[derive(Debug, Clone)]
pub struct BankTransferOrder {
    pub source_balance_id: BalanceId,
    pub destination: BankDestination,
    pub amount: Amount,
    pub external_id: String,
    pub description: String,
}

impl TransactionService {
    /// Reserve the funds and hand the transfer to the gateway engine.
    ///
    /// Returns the `Pending` transaction; the outcome arrives through
    /// provider callbacks and the notification collaborator.
    pub async fn transfer_bank(
        &self,
        actor: &dyn Actor,
        req: TransferBankRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let source = self
            .authorized_balance(actor, Some(&req.credential), &req.source_balance_id)
            .await?;

        let order = BankTransferOrder {
            source_balance_id: source.id.clone(),
            destination: BankDestination {
                bank_code: req.bank_code,
                account_number: req.account_number,
                account_name: req.account_name,
            },
            amount: req.amount,
            external_id: req.external_id,
            description: req.description,
        };
        self.submit_bank_transfer(actor.kind(), actor.snapshot(&source), order)
            .await
    }

    /// Bank transfer for a caller that already authorized the actor, such
    /// as a bulk run. Limits and balance checks still apply.
    pub async fn submit_bank_transfer(
        &self,
        actor_kind: ActorKind,
        source_party: ActorSnapshot,
        order: BankTransferOrder,
    ) -> Result<Transaction, LedgerError> {
        let source = self.load_balance(&order.source_balance_id).await?;
        if let Some(existing) = self
            .existing(
                &source.corporate_id,
                &source.id,
                TransactionType::TransferToBank,
                &order.external_id,
            )
            .await?
        {
            return Ok(existing);
        }
        self.limits.transfer_bank.check(order.amount)?;

        let destination = order.destination;
        let mut transaction = Transaction::new(
            TransactionType::TransferToBank,
            TransactionMethod::Bank,
            source.corporate_id.clone(),
            source_party,
            ActorSnapshot::new(
                PartyType::Bank,
                destination.bank_code.as_str(),
                destination.account_name.as_str(),
                destination.account_number.as_str(),
            ),
            source.currency.clone(),
            order.external_id,
        );
        transaction.status = TransactionStatus::Pending;
        transaction.source_balance_id = Some(source.id.clone());
        transaction.sub_amount = order.amount;
        transaction.description = if order.description.is_empty() {
            format!(
                "Transfer to {} {}",
                destination.bank_code, destination.account_number
            )
        } else {
            order.description
        };
        transaction.gateway_strategies = self.engine.assign_strategies(&destination);
        transaction.bank_destination = Some(destination);

        let primary = vec![Statement::withdraw(
            source.id.clone(),
            transaction.sub_amount,
            transaction.code.clone(),
            transaction.description.as_str(),
            StatementType::Transaction,
            transaction.created_at,
        )];
        let transaction = self.charge(actor_kind, transaction, primary).await?;

        // A replayed request may return an already-dispatched transaction
        if transaction.status == TransactionStatus::Pending && transaction.gateway_provider.is_none() {
            info!(code = %transaction.code, "Bank transfer reserved, queueing dispatch");
            self.tasks.enqueue(Task::DispatchTransfer {
                code: transaction.code.clone(),
            });
        }
        Ok(transaction)
    }
}
