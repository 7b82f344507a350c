//! Gateway Failover Engine
//!
//! Drives a pending bank transfer through its provider queue.
//!
//! # State machine
//!
//! ```text
//!            claim next strategy (persisted before the call)
//! PENDING ──► call provider ──► reference ──► await callback
//!    ▲             │ error / timeout              │
//!    │             ▼                              ├── COMPLETED ──► notify
//!    └──── next strategy left? ◄── FAILED/REFUND ─┘
//!                  │ no
//!                  ▼
//!               FAILED ──► compensate ──► notify
//! ```
//!
//! Every transition is one unit through the commit protocol. Provider calls
//! and follow-up work happen only after the unit that decided them has
//! committed.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::strategy::StrategyPlanner;
use super::{CallbackResult, GatewayError, GatewayRegistry};
use crate::commit::{CommitProtocol, load_transaction};
use crate::core_types::{ProviderCode, TransactionCode};
use crate::error::LedgerError;
use crate::fee::FeeCalculator;
use crate::ledger::StatementType;
use crate::tasks::{Task, TaskQueue};
use crate::transaction::{
    BankDestination, GatewayStrategy, ProviderStatus, Transaction, TransactionStatus,
};

/// How a dispatch picks its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Claim the next unexecuted strategy. Skips when an attempt is in
    /// flight or awaiting its callback.
    Advance,
    /// Re-submit to the current provider if its outcome was never recorded,
    /// otherwise advance. Used after a crash or a redelivered task.
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A provider accepted the transfer; its callback decides the rest
    Dispatched {
        provider: ProviderCode,
        reference: String,
    },
    /// No provider left: the transfer failed and was compensated
    Exhausted,
    /// Not pending, or the current attempt is already in flight or awaiting
    /// its callback
    Skipped(TransactionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Provider still processing
    Awaiting,
    /// Attempt failed, next provider queued
    Redispatched,
    Completed,
    /// Last attempt failed, transfer failed and compensated
    Failed,
    /// Stale, duplicate or unmatched callback
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Compensated,
    AlreadyCompensated,
}

/// Account holder lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInquiry {
    pub provider: ProviderCode,
    pub account_name: String,
}

enum Claim {
    Call {
        provider: ProviderCode,
        transaction: Box<Transaction>,
    },
    Exhausted,
    Skip(TransactionStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Awaiting,
    Completed,
    Redispatch,
    Exhausted,
    Ignored(&'static str),
}

pub struct GatewayEngine {
    protocol: CommitProtocol,
    registry: GatewayRegistry,
    planner: StrategyPlanner,
    tasks: TaskQueue,
    call_timeout: Duration,
}

impl GatewayEngine {
    pub fn new(
        protocol: CommitProtocol,
        registry: GatewayRegistry,
        planner: StrategyPlanner,
        tasks: TaskQueue,
        call_timeout: Duration,
    ) -> Self {
        Self {
            protocol,
            registry,
            planner,
            tasks,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    /// Provider queue for a new bank transfer
    pub fn assign_strategies(&self, destination: &BankDestination) -> Vec<GatewayStrategy> {
        self.planner.plan(destination)
    }

    // === Dispatch ===

    /// Dispatch a pending bank transfer.
    ///
    /// Synchronous provider failures (error, timeout) advance to the next
    /// strategy within this call. An exhausted queue fails the transfer and
    /// compensates it before returning.
    pub async fn create_transfer_gateway(
        &self,
        code: &TransactionCode,
        mode: DispatchMode,
    ) -> Result<DispatchOutcome, LedgerError> {
        let mut mode = mode;
        loop {
            let claim = self.claim(code, mode).await?;
            mode = DispatchMode::Advance;

            let (provider, transaction) = match claim {
                Claim::Skip(status) => {
                    debug!(code = %code, status = %status, "Dispatch skipped");
                    return Ok(DispatchOutcome::Skipped(status));
                }
                Claim::Exhausted => {
                    warn!(code = %code, "Provider queue exhausted, failing transfer");
                    self.settle_failure(code).await;
                    return Ok(DispatchOutcome::Exhausted);
                }
                Claim::Call {
                    provider,
                    transaction,
                } => (provider, transaction),
            };

            info!(code = %code, provider = %provider, "Dispatching transfer");
            match self.call_provider(&provider, &transaction).await {
                Ok(reference) => {
                    self.record_reference(code, &provider, &reference).await?;
                    info!(code = %code, provider = %provider, reference = %reference, "Provider accepted transfer");
                    return Ok(DispatchOutcome::Dispatched {
                        provider,
                        reference,
                    });
                }
                Err(e) => {
                    warn!(code = %code, provider = %provider, error = %e, "Provider call failed, advancing");
                    self.record_failure(code, &provider, e.to_string()).await?;
                }
            }
        }
    }

    /// Persist the provider choice before calling it.
    async fn claim(&self, code: &TransactionCode, mode: DispatchMode) -> Result<Claim, LedgerError> {
        let code = code.clone();
        self.protocol
            .run_unit("dispatch_claim", move |tx| {
                let code = code.clone();
                Box::pin(async move {
                    let mut t = load_transaction(tx, &code).await?;
                    if t.status != TransactionStatus::Pending {
                        return Ok(Claim::Skip(t.status));
                    }
                    if t.gateway_reference.is_some() {
                        // Current attempt is awaiting its callback
                        return Ok(Claim::Skip(t.status));
                    }
                    let now = Utc::now();

                    if let Some(provider) = t.in_flight_provider().cloned() {
                        if mode == DispatchMode::Advance {
                            // Another dispatch owns this attempt
                            return Ok(Claim::Skip(t.status));
                        }
                        t.last_dispatched_at = Some(now);
                        t.updated_at = now;
                        tx.put_transaction(&t).await?;
                        return Ok(Claim::Call {
                            provider,
                            transaction: Box::new(t),
                        });
                    }

                    match t.claim_next_strategy(now) {
                        Some(provider) => {
                            tx.put_transaction(&t).await?;
                            Ok(Claim::Call {
                                provider,
                                transaction: Box::new(t),
                            })
                        }
                        None => {
                            t.status = TransactionStatus::Failed;
                            t.updated_at = now;
                            tx.put_transaction(&t).await?;
                            Ok(Claim::Exhausted)
                        }
                    }
                })
            })
            .await
    }

    async fn call_provider(
        &self,
        provider: &ProviderCode,
        transaction: &Transaction,
    ) -> Result<String, GatewayError> {
        let gateway = self.registry.get(provider)?;
        match tokio::time::timeout(self.call_timeout, gateway.create_transfer(transaction)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                provider: provider.clone(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    async fn record_reference(
        &self,
        code: &TransactionCode,
        provider: &ProviderCode,
        reference: &str,
    ) -> Result<(), LedgerError> {
        let code = code.clone();
        let provider = provider.clone();
        let reference = reference.to_string();
        self.protocol
            .run_unit("dispatch_reference", move |tx| {
                let code = code.clone();
                let provider = provider.clone();
                let reference = reference.clone();
                Box::pin(async move {
                    let mut t = load_transaction(tx, &code).await?;
                    if t.in_flight_provider() != Some(&provider) {
                        // A callback settled this attempt first
                        return Ok(());
                    }
                    let now = Utc::now();
                    t.gateway_reference = Some(reference.clone());
                    t.record_gateway_history(
                        provider,
                        Some(reference),
                        ProviderStatus::Pending,
                        None,
                        now,
                    );
                    tx.put_transaction(&t).await?;
                    Ok(())
                })
            })
            .await
    }

    async fn record_failure(
        &self,
        code: &TransactionCode,
        provider: &ProviderCode,
        reason: String,
    ) -> Result<(), LedgerError> {
        let code = code.clone();
        let provider = provider.clone();
        self.protocol
            .run_unit("dispatch_failure", move |tx| {
                let code = code.clone();
                let provider = provider.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    let mut t = load_transaction(tx, &code).await?;
                    if t.in_flight_provider() != Some(&provider) {
                        return Ok(());
                    }
                    t.record_gateway_history(
                        provider,
                        None,
                        ProviderStatus::Failed,
                        Some(reason),
                        Utc::now(),
                    );
                    tx.put_transaction(&t).await?;
                    Ok(())
                })
            })
            .await
    }

    // === Callbacks ===

    /// Parse a raw provider callback and reconcile it.
    pub async fn handle_callback(
        &self,
        provider: &ProviderCode,
        payload: &[u8],
    ) -> Result<CallbackOutcome, LedgerError> {
        let gateway = self.registry.get(provider)?;
        let callback = gateway.parse_callback(payload)?;
        self.process_callback_gateway_transfer(provider, callback)
            .await
    }

    /// Reconcile a provider-reported status against the pending transaction.
    pub async fn process_callback_gateway_transfer(
        &self,
        provider: &ProviderCode,
        callback: CallbackResult,
    ) -> Result<CallbackOutcome, LedgerError> {
        let store = self.protocol.store();
        let found = if callback.status == ProviderStatus::Refund {
            store
                .transaction_by_gateway_reference(provider, &callback.reference)
                .await?
        } else {
            let key = callback
                .transaction_code
                .as_ref()
                .map(|c| c.as_str())
                .unwrap_or(callback.reference.as_str());
            store.pending_transaction(key).await?
        };
        let Some(found) = found else {
            warn!(
                provider = %provider,
                reference = %callback.reference,
                status = %callback.status,
                "Callback matches no transaction"
            );
            return Ok(CallbackOutcome::Ignored);
        };

        let code = found.code.clone();
        let unit_code = code.clone();
        let unit_provider = provider.clone();
        let verdict = self
            .protocol
            .run_unit("callback", move |tx| {
                let code = unit_code.clone();
                let provider = unit_provider.clone();
                let callback = callback.clone();
                Box::pin(async move {
                    let mut t = load_transaction(tx, &code).await?;
                    let verdict = reconcile(&mut t, &provider, &callback);
                    if !matches!(verdict, Verdict::Ignored(_)) {
                        tx.put_transaction(&t).await?;
                    }
                    Ok(verdict)
                })
            })
            .await?;

        debug!(code = %code, provider = %provider, verdict = ?verdict, "Callback reconciled");
        Ok(self.finish(&code, verdict).await)
    }

    /// Give up waiting for the current provider's callback and treat the
    /// attempt as failed.
    pub async fn expire_attempt(&self, code: &TransactionCode) -> Result<CallbackOutcome, LedgerError> {
        let unit_code = code.clone();
        let verdict = self
            .protocol
            .run_unit("callback_timeout", move |tx| {
                let code = unit_code.clone();
                Box::pin(async move {
                    let mut t = load_transaction(tx, &code).await?;
                    if t.status != TransactionStatus::Pending {
                        return Ok(Verdict::Ignored("transaction already settled"));
                    }
                    let (Some(provider), Some(reference)) =
                        (t.gateway_provider.clone(), t.gateway_reference.clone())
                    else {
                        return Ok(Verdict::Ignored("no attempt awaiting a callback"));
                    };
                    let verdict = fail_current_attempt(
                        &mut t,
                        provider,
                        Some(reference),
                        ProviderStatus::Failed,
                        Some("callback timeout".to_string()),
                    );
                    tx.put_transaction(&t).await?;
                    Ok(verdict)
                })
            })
            .await?;
        warn!(code = %code, verdict = ?verdict, "Provider callback timed out");
        Ok(self.finish(code, verdict).await)
    }

    /// Side effects of a committed verdict
    async fn finish(&self, code: &TransactionCode, verdict: Verdict) -> CallbackOutcome {
        match verdict {
            Verdict::Awaiting => CallbackOutcome::Awaiting,
            Verdict::Completed => {
                info!(code = %code, "Bank transfer completed");
                self.tasks.enqueue(Task::NotifyTransaction { code: code.clone() });
                CallbackOutcome::Completed
            }
            Verdict::Redispatch => {
                info!(code = %code, "Attempt failed, queueing next provider");
                self.tasks.enqueue(Task::DispatchTransfer { code: code.clone() });
                CallbackOutcome::Redispatched
            }
            Verdict::Exhausted => {
                warn!(code = %code, "Last provider failed, failing transfer");
                self.settle_failure(code).await;
                CallbackOutcome::Failed
            }
            Verdict::Ignored(reason) => {
                debug!(code = %code, reason = reason, "Callback ignored");
                CallbackOutcome::Ignored
            }
        }
    }

    // === Compensation ===

    /// Compensate, falling back to a queued retry, then notify.
    async fn settle_failure(&self, code: &TransactionCode) {
        if let Err(e) = self.compensate(code).await {
            error!(
                code = %code,
                error = %e,
                "Compensation failed, queued for retry; manual reconciliation needed if it keeps failing"
            );
            self.tasks.enqueue(Task::Compensate { code: code.clone() });
        }
        self.tasks.enqueue(Task::NotifyTransaction { code: code.clone() });
    }

    /// Restore the source balance of a failed bank transfer.
    ///
    /// Reverses the statements actually written for the transaction: the
    /// sub-amount withdraw and the fee pair. Runs at most once.
    pub async fn compensate(
        &self,
        code: &TransactionCode,
    ) -> Result<CompensationOutcome, LedgerError> {
        let store = self.protocol.store();
        let transaction = store
            .transaction(code)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(code.to_string()))?;
        if transaction.status != TransactionStatus::Failed {
            return Err(LedgerError::InvalidStateTransition(format!(
                "cannot compensate {} in status {}",
                code, transaction.status
            )));
        }
        if transaction.compensated_at.is_some() {
            return Ok(CompensationOutcome::AlreadyCompensated);
        }

        let trail = store.statements_by_reference(code).await?;
        let now = Utc::now();
        let mut statements: Vec<_> = trail
            .iter()
            .filter(|s| s.statement_type == StatementType::Transaction)
            .rev()
            .map(|s| s.reversed(now))
            .collect();
        statements.extend(FeeCalculator::rollback_fee_statements(&trail));
        if statements.is_empty() {
            return Err(LedgerError::InvalidStateTransition(format!(
                "no statements to reverse for {}",
                code
            )));
        }

        match self.protocol.commit_rollback(code, statements).await {
            Ok(applied) => {
                info!(code = %code, statements = applied.len(), "Transfer compensated");
                Ok(CompensationOutcome::Compensated)
            }
            Err(LedgerError::AlreadyCompensated(_)) => {
                Ok(CompensationOutcome::AlreadyCompensated)
            }
            Err(e) => Err(e),
        }
    }

    // === Inquiry ===

    /// Resolve an account holder name, trying providers in routing order.
    pub async fn inquiry(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> Result<AccountInquiry, LedgerError> {
        let mut last_error = None;
        for provider in self.planner.order_for(bank_code, account_number) {
            let gateway = match self.registry.get(provider) {
                Ok(gateway) => gateway,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let result =
                tokio::time::timeout(self.call_timeout, gateway.inquiry(bank_code, account_number))
                    .await;
            match result {
                Ok(Ok(account_name)) => {
                    return Ok(AccountInquiry {
                        provider: provider.clone(),
                        account_name,
                    });
                }
                Ok(Err(e)) => {
                    debug!(provider = %provider, error = %e, "Inquiry failed, trying next provider");
                    last_error = Some(e);
                }
                Err(_) => {
                    last_error = Some(GatewayError::Timeout {
                        provider: provider.clone(),
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    });
                }
            }
        }
        Err(match last_error {
            Some(e) => LedgerError::Gateway(e),
            None => LedgerError::ServiceUnavailable("no inquiry provider configured".into()),
        })
    }
}

/// Fail the current attempt and pick the queue's next move.
fn fail_current_attempt(
    t: &mut Transaction,
    provider: ProviderCode,
    reference: Option<String>,
    status: ProviderStatus,
    error: Option<String>,
) -> Verdict {
    let now = Utc::now();
    t.record_gateway_history(provider, reference, status, error, now);
    t.gateway_reference = None;
    // Keeps the recovery scan away until the queued dispatch runs
    t.last_dispatched_at = Some(now);
    t.updated_at = now;
    if t.strategies_exhausted() {
        t.status = TransactionStatus::Failed;
        Verdict::Exhausted
    } else {
        t.status = TransactionStatus::Pending;
        Verdict::Redispatch
    }
}

/// Apply a callback to the transaction in memory.
fn reconcile(t: &mut Transaction, provider: &ProviderCode, callback: &CallbackResult) -> Verdict {
    if t.gateway_provider.as_ref() != Some(provider) {
        return Verdict::Ignored("provider is not the current strategy");
    }
    if let Some(stored) = t.gateway_reference.as_deref()
        && stored != callback.reference
    {
        return Verdict::Ignored("reference does not match current attempt");
    }
    let reference = callback.reference.as_str();
    let attempt_failed = t.gateway_histories.iter().any(|h| {
        &h.provider == provider && h.reference.as_deref() == Some(reference) && h.status.is_failure()
    });
    if attempt_failed {
        return Verdict::Ignored("attempt already failed");
    }
    let duplicate = t.gateway_histories.iter().any(|h| {
        &h.provider == provider
            && h.reference.as_deref() == Some(reference)
            && h.status == callback.status
    });

    match callback.status {
        ProviderStatus::Pending => {
            if t.status != TransactionStatus::Pending {
                return Verdict::Ignored("transaction already settled");
            }
            t.gateway_reference = Some(callback.reference.clone());
            t.record_gateway_history(
                provider.clone(),
                Some(callback.reference.clone()),
                ProviderStatus::Pending,
                None,
                Utc::now(),
            );
            Verdict::Awaiting
        }
        _ if duplicate => Verdict::Ignored("duplicate callback"),
        ProviderStatus::Completed => {
            if t.status != TransactionStatus::Pending {
                return Verdict::Ignored("transaction already settled");
            }
            let now = Utc::now();
            t.gateway_reference = Some(callback.reference.clone());
            t.record_gateway_history(
                provider.clone(),
                Some(callback.reference.clone()),
                ProviderStatus::Completed,
                None,
                now,
            );
            t.status = TransactionStatus::Completed;
            t.updated_at = now;
            Verdict::Completed
        }
        ProviderStatus::Failed => {
            if t.status != TransactionStatus::Pending {
                return Verdict::Ignored("transaction already settled");
            }
            fail_current_attempt(
                t,
                provider.clone(),
                Some(callback.reference.clone()),
                ProviderStatus::Failed,
                None,
            )
        }
        ProviderStatus::Refund => {
            if t.status == TransactionStatus::Failed {
                return Verdict::Ignored("transaction already failed");
            }
            fail_current_attempt(
                t,
                provider.clone(),
                Some(callback.reference.clone()),
                ProviderStatus::Refund,
                None,
            )
        }
    }
}
