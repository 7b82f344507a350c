//! Bulk Orchestrator
//!
//! ```text
//! create (UNEXECUTED) -> execute: authorize once (PROGRESS) -> queue run
//! run: for each unprocessed line -> transfer / inquiry -> record outcome
//!      all lines processed -> COMPLETED -> queue batch notification
//! ```
//!
//! Progress is saved after every line, so a redelivered run resumes where
//! the previous one stopped. Line transfers use the stable external id
//! `<bulk id>-<number>`; a line that committed but was not yet recorded
//! resolves to the same transaction on the rerun.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use super::types::{
    BulkExecutor, BulkInquiry, BulkInquiryItem, BulkStatus, BulkTransfer, BulkTransferItem,
    LineOutcome,
};
use crate::actor::{Actor, Credential};
use crate::core_types::{Amount, BalanceId, BulkId};
use crate::error::LedgerError;
use crate::gateway::GatewayEngine;
use crate::store::LedgerStore;
use crate::tasks::{Task, TaskQueue};
use crate::transaction::BankDestination;
use crate::usecase::validation::authorize;
use crate::usecase::{BankTransferOrder, TransactionService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkTransferLine {
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub amount: Amount,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBulkTransferRequest {
    pub balance_id: BalanceId,
    #[validate(length(min = 1, max = 128))]
    pub reference: String,
    pub items: Vec<BulkTransferLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInquiryLine {
    pub bank_code: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBulkInquiryRequest {
    #[validate(length(min = 1, max = 128))]
    pub reference: String,
    pub items: Vec<BulkInquiryLine>,
}

pub struct BulkOrchestrator {
    store: Arc<dyn LedgerStore>,
    service: Arc<TransactionService>,
    engine: Arc<GatewayEngine>,
    tasks: TaskQueue,
}

/// Transient infrastructure failures stop the run so the task is
/// redelivered; anything else is recorded against the line.
fn aborts_run(e: &LedgerError) -> bool {
    match e {
        LedgerError::Store(e) => e.is_transient(),
        LedgerError::ServiceUnavailable(_) => true,
        _ => false,
    }
}

fn already_executed(id: &BulkId) -> LedgerError {
    LedgerError::InvalidStateTransition(format!("bulk {id} was executed concurrently"))
}

impl BulkOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        service: Arc<TransactionService>,
        engine: Arc<GatewayEngine>,
        tasks: TaskQueue,
    ) -> Self {
        Self {
            store,
            service,
            engine,
            tasks,
        }
    }

    // === Bulk transfer ===

    pub async fn create_bulk_transfer(
        &self,
        actor: &dyn Actor,
        req: CreateBulkTransferRequest,
    ) -> Result<BulkTransfer, LedgerError> {
        req.validate()?;
        if req.items.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        let balance = self.service.load_balance(&req.balance_id).await?;
        if balance.corporate_id != *actor.corporate_id() {
            return Err(LedgerError::BalanceAccessDenied(balance.id));
        }

        let total_amount = req
            .items
            .iter()
            .try_fold(0 as Amount, |acc, line| acc.checked_add(line.amount))
            .ok_or(LedgerError::Overflow)?;
        let items: Vec<BulkTransferItem> = req
            .items
            .into_iter()
            .zip(1u32..)
            .map(|(line, number)| BulkTransferItem {
                number,
                bank_code: line.bank_code,
                account_number: line.account_number,
                account_name: line.account_name,
                amount: line.amount,
                description: line.description,
                transaction_code: None,
                outcome: LineOutcome::default(),
            })
            .collect();

        let now = Utc::now();
        let bulk = BulkTransfer {
            id: BulkId::generate(),
            corporate_id: balance.corporate_id.clone(),
            owner_id: actor.id().clone(),
            balance_id: balance.id.clone(),
            reference: req.reference,
            total_count: items.len() as u32,
            total_amount,
            status: BulkStatus::Unexecuted,
            items,
            failed_numbers: Vec::new(),
            executed_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.save_bulk_transfer(&bulk).await?;
        info!(bulk_id = %bulk.id, lines = bulk.total_count, total = bulk.total_amount, "Bulk transfer created");
        Ok(bulk)
    }

    pub async fn bulk_transfer(&self, id: &BulkId) -> Result<BulkTransfer, LedgerError> {
        self.store
            .bulk_transfer(id)
            .await?
            .ok_or_else(|| LedgerError::BulkNotFound(id.clone()))
    }

    /// Authorize the whole batch once and queue its run.
    pub async fn execute_bulk_transfer(
        &self,
        actor: &dyn Actor,
        id: &BulkId,
        credential: &Credential,
    ) -> Result<BulkTransfer, LedgerError> {
        let mut bulk = self.bulk_transfer(id).await?;
        if bulk.status != BulkStatus::Unexecuted {
            return Err(LedgerError::InvalidStateTransition(format!(
                "bulk {} is {}",
                bulk.id, bulk.status
            )));
        }
        let balance = self.service.load_balance(&bulk.balance_id).await?;
        authorize(self.service.verifier(), actor, Some(credential), &balance).await?;

        bulk.executed_by = Some(BulkExecutor {
            actor_id: actor.id().clone(),
            actor_kind: actor.kind(),
            snapshot: actor.snapshot(&balance),
        });
        bulk.status = BulkStatus::Progress;
        bulk.updated_at = Utc::now();
        if !self
            .store
            .transition_bulk_transfer(&bulk, BulkStatus::Unexecuted)
            .await?
        {
            return Err(already_executed(&bulk.id));
        }

        info!(bulk_id = %bulk.id, actor = %actor.id(), "Bulk transfer authorized");
        self.tasks.enqueue(Task::ExecuteBulkTransfer { id: bulk.id.clone() });
        Ok(bulk)
    }

    /// Process every unprocessed line. Idempotent.
    pub async fn run_bulk_transfer(&self, id: &BulkId) -> Result<BulkTransfer, LedgerError> {
        let mut bulk = self.bulk_transfer(id).await?;
        match bulk.status {
            BulkStatus::Completed => return Ok(bulk),
            BulkStatus::Unexecuted => {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "bulk {} was never executed",
                    bulk.id
                )));
            }
            BulkStatus::Progress => {}
        }
        let executor = bulk.executed_by.clone().ok_or_else(|| {
            LedgerError::InvalidStateTransition(format!("bulk {} has no executor", bulk.id))
        })?;

        for index in 0..bulk.items.len() {
            if bulk.items[index].outcome.processed {
                continue;
            }
            let item = &bulk.items[index];
            let order = BankTransferOrder {
                source_balance_id: bulk.balance_id.clone(),
                destination: BankDestination {
                    bank_code: item.bank_code.clone(),
                    account_number: item.account_number.clone(),
                    account_name: item.account_name.clone(),
                },
                amount: item.amount,
                external_id: bulk.line_external_id(item.number),
                description: if item.description.is_empty() {
                    format!("{} #{}", bulk.reference, item.number)
                } else {
                    item.description.clone()
                },
            };

            let result = self
                .service
                .submit_bank_transfer(executor.actor_kind, executor.snapshot.clone(), order)
                .await;
            let item = &mut bulk.items[index];
            match result {
                Ok(transaction) => {
                    item.transaction_code = Some(transaction.code);
                    item.outcome.processed = true;
                }
                Err(e) if aborts_run(&e) => {
                    warn!(bulk_id = %bulk.id, line = item.number, error = %e, "Bulk run interrupted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(bulk_id = %bulk.id, line = item.number, error = %e, "Bulk line failed");
                    item.outcome.processed = true;
                    item.outcome.failure_reason = Some(e.to_string());
                    let number = item.number;
                    bulk.failed_numbers.push(number);
                }
            }
            bulk.updated_at = Utc::now();
            self.store.save_bulk_transfer(&bulk).await?;
        }

        let now = Utc::now();
        bulk.status = BulkStatus::Completed;
        bulk.completed_at = Some(now);
        bulk.updated_at = now;
        self.store.save_bulk_transfer(&bulk).await?;
        info!(
            bulk_id = %bulk.id,
            succeeded = bulk.succeeded_count(),
            failed = bulk.failed_numbers.len(),
            "Bulk transfer completed"
        );
        self.tasks.enqueue(Task::NotifyBulkTransfer { id: bulk.id.clone() });
        Ok(bulk)
    }

    // === Bulk inquiry ===

    pub async fn create_bulk_inquiry(
        &self,
        actor: &dyn Actor,
        req: CreateBulkInquiryRequest,
    ) -> Result<BulkInquiry, LedgerError> {
        req.validate()?;
        if req.items.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        let items: Vec<BulkInquiryItem> = req
            .items
            .into_iter()
            .zip(1u32..)
            .map(|(line, number)| BulkInquiryItem {
                number,
                bank_code: line.bank_code,
                account_number: line.account_number,
                account_name: None,
                outcome: LineOutcome::default(),
            })
            .collect();

        let now = Utc::now();
        let bulk = BulkInquiry {
            id: BulkId::generate(),
            corporate_id: actor.corporate_id().clone(),
            owner_id: actor.id().clone(),
            reference: req.reference,
            total_count: items.len() as u32,
            status: BulkStatus::Unexecuted,
            items,
            failed_numbers: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.save_bulk_inquiry(&bulk).await?;
        info!(bulk_id = %bulk.id, lines = bulk.total_count, "Bulk inquiry created");
        Ok(bulk)
    }

    pub async fn bulk_inquiry(&self, id: &BulkId) -> Result<BulkInquiry, LedgerError> {
        self.store
            .bulk_inquiry(id)
            .await?
            .ok_or_else(|| LedgerError::BulkNotFound(id.clone()))
    }

    /// Lookups move no money: a verified actor of the owning corporate is
    /// enough.
    pub async fn execute_bulk_inquiry(
        &self,
        actor: &dyn Actor,
        id: &BulkId,
    ) -> Result<BulkInquiry, LedgerError> {
        let mut bulk = self.bulk_inquiry(id).await?;
        if bulk.status != BulkStatus::Unexecuted {
            return Err(LedgerError::InvalidStateTransition(format!(
                "bulk {} is {}",
                bulk.id, bulk.status
            )));
        }
        if !actor.is_verified() {
            return Err(LedgerError::UnverifiedActor);
        }
        if *actor.corporate_id() != bulk.corporate_id {
            return Err(LedgerError::InvalidRequest(format!(
                "bulk {} belongs to another corporate",
                bulk.id
            )));
        }
        bulk.status = BulkStatus::Progress;
        bulk.updated_at = Utc::now();
        if !self
            .store
            .transition_bulk_inquiry(&bulk, BulkStatus::Unexecuted)
            .await?
        {
            return Err(already_executed(&bulk.id));
        }
        self.tasks.enqueue(Task::ExecuteBulkInquiry { id: bulk.id.clone() });
        Ok(bulk)
    }

    pub async fn run_bulk_inquiry(&self, id: &BulkId) -> Result<BulkInquiry, LedgerError> {
        let mut bulk = self.bulk_inquiry(id).await?;
        match bulk.status {
            BulkStatus::Completed => return Ok(bulk),
            BulkStatus::Unexecuted => {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "bulk {} was never executed",
                    bulk.id
                )));
            }
            BulkStatus::Progress => {}
        }

        for index in 0..bulk.items.len() {
            if bulk.items[index].outcome.processed {
                continue;
            }
            let (bank_code, account_number) = {
                let item = &bulk.items[index];
                (item.bank_code.clone(), item.account_number.clone())
            };
            let result = self.engine.inquiry(&bank_code, &account_number).await;
            let item = &mut bulk.items[index];
            item.outcome.processed = true;
            match result {
                Ok(found) => item.account_name = Some(found.account_name),
                Err(e) => {
                    item.outcome.failure_reason = Some(e.to_string());
                    let number = item.number;
                    bulk.failed_numbers.push(number);
                }
            }
            bulk.updated_at = Utc::now();
            self.store.save_bulk_inquiry(&bulk).await?;
        }

        let now = Utc::now();
        bulk.status = BulkStatus::Completed;
        bulk.completed_at = Some(now);
        bulk.updated_at = now;
        self.store.save_bulk_inquiry(&bulk).await?;
        info!(bulk_id = %bulk.id, failed = bulk.failed_numbers.len(), "Bulk inquiry completed");
        self.tasks.enqueue(Task::NotifyBulkInquiry { id: bulk.id.clone() });
        Ok(bulk)
    }
}
