//! Composition root
//!
//! [`WalletLedger`] wires the commit protocol, gateway engine, use cases,
//! bulk orchestrator and task queue around one store handle. Nothing here is
//! global: every component receives its collaborators at construction.
//!
//! ```text
//! WalletDeps + AppConfig
//!     -> CommitProtocol(store, retry)
//!     -> GatewayEngine(protocol, registry, routing, tasks)
//!     -> TransactionService(protocol, fees, verifier, engine, tasks, limits)
//!     -> BulkOrchestrator(store, service, engine, tasks)
//!     -> TaskRunner(LedgerTaskHandler)      returned to the caller to drive
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::actor::CredentialVerifier;
use crate::bulk::BulkOrchestrator;
use crate::commit::CommitProtocol;
use crate::config::AppConfig;
use crate::core_types::{BalanceId, CorporateId, ProviderCode, TransactionCode};
use crate::error::LedgerError;
use crate::fee::FeeScheduleProvider;
use crate::gateway::{
    AccountInquiry, CallbackOutcome, DispatchMode, GatewayEngine, GatewayRegistry, StrategyPlanner,
};
use crate::ledger::{Balance, Statement};
use crate::notify::Notifier;
use crate::store::{LedgerStore, PageRequest, StoreError};
use crate::tasks::{Task, TaskEnvelope, TaskHandler, TaskQueue, TaskRunner};
use crate::transaction::Transaction;
use crate::usecase::TransactionService;
use crate::worker::{RecoveryWorker, WorkerConfig};

/// Collaborators owned by other services
pub struct WalletDeps {
    pub store: Arc<dyn LedgerStore>,
    pub fees: Arc<dyn FeeScheduleProvider>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub notifier: Arc<dyn Notifier>,
    pub registry: GatewayRegistry,
}

pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
    protocol: CommitProtocol,
    engine: Arc<GatewayEngine>,
    service: Arc<TransactionService>,
    bulk: Arc<BulkOrchestrator>,
    tasks: TaskQueue,
    worker_config: WorkerConfig,
    callback_timeout: Option<Duration>,
}

impl WalletLedger {
    /// Build every component. The returned runner must be driven (spawned,
    /// or drained with `run_until_idle`) for follow-up work to happen.
    pub fn new(deps: WalletDeps, config: &AppConfig) -> Result<(Self, TaskRunner), LedgerError> {
        let planner = StrategyPlanner::new(config.gateway.routing.clone())?;
        Self::check_routing(&deps.registry, config)?;

        let (tasks, receiver) = TaskQueue::channel();
        let protocol = CommitProtocol::new(deps.store.clone(), config.retry.policy());
        let engine = Arc::new(GatewayEngine::new(
            protocol.clone(),
            deps.registry,
            planner,
            tasks.clone(),
            config.gateway.call_timeout(),
        ));
        let service = Arc::new(TransactionService::new(
            protocol.clone(),
            deps.fees,
            deps.verifier,
            engine.clone(),
            tasks.clone(),
            config.limits.clone(),
        ));
        let bulk = Arc::new(BulkOrchestrator::new(
            deps.store.clone(),
            service.clone(),
            engine.clone(),
            tasks.clone(),
        ));

        let handler = Arc::new(LedgerTaskHandler {
            store: deps.store.clone(),
            engine: engine.clone(),
            bulk: bulk.clone(),
            notifier: deps.notifier,
        });
        let runner = TaskRunner::new(tasks.clone(), receiver, handler, config.tasks.policy());

        info!(
            providers = ?engine.registry().codes(),
            callback_timeout_secs = config.gateway.callback_timeout_secs,
            "Wallet ledger initialized"
        );

        Ok((
            Self {
                store: deps.store,
                protocol,
                engine,
                service,
                bulk,
                tasks,
                worker_config: config.worker.clone(),
                callback_timeout: config.gateway.callback_timeout(),
            },
            runner,
        ))
    }

    /// Every routed provider must be registered
    fn check_routing(registry: &GatewayRegistry, config: &AppConfig) -> Result<(), LedgerError> {
        let routing = &config.gateway.routing;
        let missing: Vec<&ProviderCode> = routing
            .ewallet_order
            .iter()
            .chain(&routing.direct_bank_order)
            .chain(&routing.default_order)
            .filter(|code| !registry.contains(code))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::InvalidRequest(format!(
                "routing references unregistered providers: {:?}",
                missing
            )))
        }
    }

    pub fn service(&self) -> &Arc<TransactionService> {
        &self.service
    }

    pub fn bulk(&self) -> &Arc<BulkOrchestrator> {
        &self.bulk
    }

    pub fn engine(&self) -> &Arc<GatewayEngine> {
        &self.engine
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn protocol(&self) -> &CommitProtocol {
        &self.protocol
    }

    pub fn recovery_worker(&self) -> RecoveryWorker {
        RecoveryWorker::new(
            self.store.clone(),
            self.engine.clone(),
            self.worker_config.clone(),
            self.callback_timeout,
        )
    }

    // === Balances ===

    /// Register a balance provisioned by the account service.
    ///
    /// Balances open empty; money only arrives through statements.
    pub async fn open_balance(&self, balance: Balance) -> Result<Balance, LedgerError> {
        if balance.amount != 0 {
            return Err(LedgerError::InvalidRequest(format!(
                "balance {} must open with zero amount",
                balance.id
            )));
        }
        match self.store.create_balance(&balance).await {
            Ok(()) => {
                info!(
                    balance_id = %balance.id,
                    corporate = %balance.corporate_id,
                    currency = %balance.currency,
                    "Balance opened"
                );
                Ok(balance)
            }
            Err(StoreError::Duplicate(_)) => Err(LedgerError::InvalidRequest(format!(
                "balance {} already exists",
                balance.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn balance(&self, id: &BalanceId) -> Result<Balance, LedgerError> {
        self.store
            .balance(id)
            .await?
            .ok_or_else(|| LedgerError::BalanceNotFound(id.clone()))
    }

    /// Statement history, newest first
    pub async fn statements(
        &self,
        id: &BalanceId,
        page: PageRequest,
    ) -> Result<Vec<Statement>, LedgerError> {
        self.balance(id).await?;
        Ok(self.store.statements(id, page).await?)
    }

    // === Transactions ===

    pub async fn transaction(&self, code: &TransactionCode) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(code)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(code.to_string()))
    }

    pub async fn transaction_by_external_id(
        &self,
        corporate_id: &CorporateId,
        external_id: &str,
    ) -> Result<Transaction, LedgerError> {
        self.store
            .transaction_by_external_id(corporate_id, external_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(external_id.to_string()))
    }

    // === Providers ===

    /// Raw provider callback entry point
    pub async fn handle_callback(
        &self,
        provider: &ProviderCode,
        payload: &[u8],
    ) -> Result<CallbackOutcome, LedgerError> {
        self.engine.handle_callback(provider, payload).await
    }

    pub async fn inquiry(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> Result<AccountInquiry, LedgerError> {
        self.engine.inquiry(bank_code, account_number).await
    }
}

/// Runs queued follow-up work against the engine, the bulk orchestrator and
/// the notifier. Every branch is idempotent on the task key.
pub struct LedgerTaskHandler {
    store: Arc<dyn LedgerStore>,
    engine: Arc<GatewayEngine>,
    bulk: Arc<BulkOrchestrator>,
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl TaskHandler for LedgerTaskHandler {
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), LedgerError> {
        match &envelope.task {
            Task::DispatchTransfer { code } => {
                // A redelivery may follow a crash between claim and record
                let mode = if envelope.attempt > 1 {
                    DispatchMode::Resume
                } else {
                    DispatchMode::Advance
                };
                let outcome = self.engine.create_transfer_gateway(code, mode).await?;
                debug!(code = %code, outcome = ?outcome, "Dispatch task done");
            }
            Task::Compensate { code } => {
                let outcome = self.engine.compensate(code).await?;
                debug!(code = %code, outcome = ?outcome, "Compensation task done");
            }
            Task::NotifyTransaction { code } => {
                let transaction = self
                    .store
                    .transaction(code)
                    .await?
                    .ok_or_else(|| LedgerError::TransactionNotFound(code.to_string()))?;
                self.notifier.transaction_settled(&transaction).await?;
            }
            Task::ExecuteBulkTransfer { id } => {
                self.bulk.run_bulk_transfer(id).await?;
            }
            Task::ExecuteBulkInquiry { id } => {
                self.bulk.run_bulk_inquiry(id).await?;
            }
            Task::NotifyBulkTransfer { id } => {
                let bulk = self.bulk.bulk_transfer(id).await?;
                self.notifier.bulk_transfer_completed(&bulk).await?;
            }
            Task::NotifyBulkInquiry { id } => {
                let bulk = self.bulk.bulk_inquiry(id).await?;
                self.notifier.bulk_inquiry_completed(&bulk).await?;
            }
        }
        Ok(())
    }
}

