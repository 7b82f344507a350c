//! Transaction Use Cases
//!
//! Every money movement follows the same shape:
//!
//! ```text
//! idempotency check -> resolve balances -> authorize -> build Transaction
//!   -> primary statements + fee statements -> commit (one unit)
//!   -> queue follow-up (notify, or dispatch for bank transfers)
//! ```
//!
//! Validation happens before the unit starts; the statement ledger repeats
//! the balance check inside the unit against a fresh read.

mod accept_card;
mod biller;
mod deduct;
mod topup;
mod transfer_balance;
mod transfer_bank;
pub mod validation;


use std::sync::Arc;
use tracing::{debug, info, warn};

pub use accept_card::AcceptCardRequest;
pub use biller::BillerRequest;
pub use deduct::DeductRequest;
pub use topup::TopupRequest;
pub use transfer_balance::{PayQrRequest, TransferBalanceRequest, TransferCashRequest};
pub use transfer_bank::{BankTransferOrder, TransferBankRequest};
pub use validation::{AmountLimits, TransactionLimits};

use crate::actor::{Actor, ActorKind, Credential, CredentialVerifier};
use crate::commit::CommitProtocol;
use crate::core_types::{Amount, BalanceId, CorporateId};
use crate::error::LedgerError;
use crate::fee::{FeeCalculator, FeeSchedule, FeeScheduleProvider};
use crate::gateway::GatewayEngine;
use crate::ledger::{Balance, Statement};
use crate::store::StoreError;
use crate::tasks::{Task, TaskQueue};
use crate::transaction::{Transaction, TransactionType};

pub struct TransactionService {
    protocol: CommitProtocol,
    fees: Arc<dyn FeeScheduleProvider>,
    verifier: Arc<dyn CredentialVerifier>,
    engine: Arc<GatewayEngine>,
    tasks: TaskQueue,
    limits: TransactionLimits,
}

impl TransactionService {
    pub fn new(
        protocol: CommitProtocol,
        fees: Arc<dyn FeeScheduleProvider>,
        verifier: Arc<dyn CredentialVerifier>,
        engine: Arc<GatewayEngine>,
        tasks: TaskQueue,
        limits: TransactionLimits,
    ) -> Self {
        Self {
            protocol,
            fees,
            verifier,
            engine,
            tasks,
            limits,
        }
    }

    pub fn limits(&self) -> &TransactionLimits {
        &self.limits
    }

    pub(crate) fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }

    // === Shared steps ===

    /// Transaction already recorded for a repeated request.
    ///
    /// Runs after the actor is authorized on `payer`. The recorded
    /// transaction is a replay only when it is the same operation paid by
    /// the same balance; any other use of the external id is rejected.
    async fn existing(
        &self,
        corporate_id: &CorporateId,
        payer: &BalanceId,
        transaction_type: TransactionType,
        external_id: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let Some(found) = self
            .protocol
            .store()
            .transaction_by_external_id(corporate_id, external_id)
            .await?
        else {
            return Ok(None);
        };
        if found.transaction_type != transaction_type || found.fee_payer() != Some(payer) {
            warn!(
                external_id = external_id,
                balance_id = %payer,
                transaction_type = %transaction_type,
                "External id already used by another operation"
            );
            return Err(LedgerError::DuplicateRequest(format!(
                "external id {} is already used",
                external_id
            )));
        }
        debug!(external_id = external_id, code = %found.code, "Repeated request, returning recorded transaction");
        Ok(Some(found))
    }

    pub(crate) async fn load_balance(&self, id: &BalanceId) -> Result<Balance, LedgerError> {
        self.protocol
            .store()
            .balance(id)
            .await?
            .ok_or_else(|| LedgerError::BalanceNotFound(id.clone()))
    }

    /// Load the debited balance and check the actor may use it
    async fn authorized_balance(
        &self,
        actor: &dyn Actor,
        credential: Option<&Credential>,
        id: &BalanceId,
    ) -> Result<Balance, LedgerError> {
        let balance = self.load_balance(id).await?;
        validation::authorize(self.verifier.as_ref(), actor, credential, &balance).await?;
        Ok(balance)
    }

    async fn fee_schedule(
        &self,
        corporate_id: &CorporateId,
    ) -> Result<Option<FeeSchedule>, LedgerError> {
        self.fees.fee_schedule(corporate_id).await
    }

    /// Fee amount and statements for `transaction`, paid by `payer`
    async fn fee_statements(
        &self,
        actor_kind: ActorKind,
        payer: &BalanceId,
        transaction: &Transaction,
    ) -> Result<(Amount, Vec<Statement>), LedgerError> {
        let schedule = self.fee_schedule(&transaction.corporate_id).await?;
        let calculator = FeeCalculator::initialize(schedule, actor_kind, payer, transaction);
        let statements = calculator.calculate_by_owner_and_transaction()?;
        let fee = if statements.is_empty() {
            0
        } else {
            calculator.fee_amount()?
        };
        Ok((fee, statements))
    }

    /// Commit a new transaction with its statements.
    ///
    /// A concurrent request with the same external id that committed first
    /// wins; its transaction is returned instead of an error.
    async fn record(
        &self,
        statements: Vec<Statement>,
        transaction: Transaction,
    ) -> Result<Transaction, LedgerError> {
        match self.protocol.commit(statements, transaction.clone()).await {
            Ok(_) => {
                info!(
                    code = %transaction.code,
                    transaction_type = %transaction.transaction_type,
                    status = %transaction.status,
                    amount = transaction.amount,
                    "Transaction committed"
                );
                Ok(transaction)
            }
            Err(LedgerError::Store(StoreError::Duplicate(reason))) => {
                let winner = match transaction.fee_payer() {
                    Some(payer) => {
                        self.existing(
                            &transaction.corporate_id,
                            payer,
                            transaction.transaction_type,
                            &transaction.external_id,
                        )
                        .await?
                    }
                    None => None,
                };
                winner.ok_or(LedgerError::DuplicateRequest(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Outgoing operation: the source pays `sub_amount + fee`.
    ///
    /// `primary` carries the sub-amount movement; fee statements are added
    /// after it.
    async fn charge(
        &self,
        actor_kind: ActorKind,
        mut transaction: Transaction,
        primary: Vec<Statement>,
    ) -> Result<Transaction, LedgerError> {
        let payer = transaction
            .source_balance_id
            .clone()
            .ok_or_else(|| LedgerError::SystemError("outgoing transaction without source".into()))?;
        let (fee, fees) = self.fee_statements(actor_kind, &payer, &transaction).await?;
        transaction.total_fee = fee;
        transaction.amount = validation::gross_of_fee(transaction.sub_amount, fee)?;

        let mut statements = primary;
        statements.extend(fees);
        self.record(statements, transaction).await
    }

    /// Synchronously complete operations only queue their notification
    fn settled(&self, transaction: &Transaction) {
        self.tasks.enqueue(Task::NotifyTransaction {
            code: transaction.code.clone(),
        });
    }
}
