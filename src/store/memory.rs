//! In-memory Ledger Store
//!
//! Every balance and transaction carries a version. A unit records the
//! version of everything it read; `commit` re-checks those versions under
//! the store lock and reports `Conflict` if any moved. Writes stay private
//! to the unit until then.
//!
//! Fault injection (`inject_conflicts`, `inject_unknown_commit_results`)
//! lets tests drive the commit protocol's retry paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

use super::{LedgerStore, LedgerTx, PageRequest, StoreError};
use crate::bulk::types::{BulkInquiry, BulkStatus, BulkTransfer};
use crate::core_types::{BalanceId, BulkId, CorporateId, ProviderCode, TransactionCode};
use crate::ledger::{Balance, Statement};
use crate::transaction::{Transaction, TransactionStatus, TransactionType};

/// External ids are unique per corporate
type ExternalKey = (CorporateId, String);

fn external_key(t: &Transaction) -> Option<ExternalKey> {
    (!t.external_id.is_empty()).then(|| (t.corporate_id.clone(), t.external_id.clone()))
}

struct Versioned<T> {
    value: T,
    version: u64,
}

#[derive(Default)]
struct MemoryState {
    balances: FxHashMap<BalanceId, Versioned<Balance>>,
    /// Commit order
    statements: Vec<Statement>,
    transactions: FxHashMap<TransactionCode, Versioned<Transaction>>,
    external_ids: FxHashMap<ExternalKey, TransactionCode>,
    bulk_transfers: FxHashMap<BulkId, BulkTransfer>,
    bulk_inquiries: FxHashMap<BulkId, BulkInquiry>,
}

struct Inner {
    state: Mutex<MemoryState>,
    injected_conflicts: AtomicU32,
    injected_unknown_results: AtomicU32,
    begins: AtomicU64,
    commits: AtomicU64,
}

/// Decrement `counter` if positive; true when a fault was consumed.
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MemoryState::default()),
                injected_conflicts: AtomicU32::new(0),
                injected_unknown_results: AtomicU32::new(0),
                begins: AtomicU64::new(0),
                commits: AtomicU64::new(0),
            }),
        }
    }

    // === Fault injection ===

    /// The next `n` commits fail with `Conflict` and apply nothing.
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// The next `n` commits apply their writes, then report `UnknownCommitResult`.
    pub fn inject_unknown_commit_results(&self, n: u32) {
        self.inner.injected_unknown_results.store(n, Ordering::SeqCst);
    }

    /// Units whose writes were applied
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn begin_count(&self) -> u64 {
        self.inner.begins.load(Ordering::SeqCst)
    }

    /// Every committed statement, in commit order
    pub fn all_statements(&self) -> Vec<Statement> {
        self.inner.state.lock().statements.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        self.inner.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTx::new(self.inner.clone())))
    }

    async fn create_balance(&self, balance: &Balance) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        if state.balances.contains_key(&balance.id) {
            return Err(StoreError::Duplicate(format!("balance {}", balance.id)));
        }
        state.balances.insert(
            balance.id.clone(),
            Versioned {
                value: balance.clone(),
                version: 1,
            },
        );
        Ok(())
    }

    async fn balance(&self, id: &BalanceId) -> Result<Option<Balance>, StoreError> {
        Ok(self
            .inner
            .state
            .lock()
            .balances
            .get(id)
            .map(|v| v.value.clone()))
    }

    async fn statements(
        &self,
        balance_id: &BalanceId,
        page: PageRequest,
    ) -> Result<Vec<Statement>, StoreError> {
        let state = self.inner.state.lock();
        Ok(state
            .statements
            .iter()
            .rev()
            .filter(|s| &s.balance_id == balance_id)
            .skip(page.offset())
            .take(page.limit())
            .cloned()
            .collect())
    }

    async fn statements_by_reference(
        &self,
        reference: &TransactionCode,
    ) -> Result<Vec<Statement>, StoreError> {
        let state = self.inner.state.lock();
        Ok(state
            .statements
            .iter()
            .filter(|s| &s.reference == reference)
            .cloned()
            .collect())
    }

    async fn transaction(&self, code: &TransactionCode) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .inner
            .state
            .lock()
            .transactions
            .get(code)
            .map(|v| v.value.clone()))
    }

    async fn transaction_by_external_id(
        &self,
        corporate_id: &CorporateId,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.inner.state.lock();
        Ok(state
            .external_ids
            .get(&(corporate_id.clone(), external_id.to_string()))
            .and_then(|code| state.transactions.get(code))
            .map(|v| v.value.clone()))
    }

    async fn transaction_by_gateway_reference(
        &self,
        provider: &ProviderCode,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.inner.state.lock();
        Ok(state
            .transactions
            .values()
            .map(|v| &v.value)
            .find(|t| {
                t.gateway_provider.as_ref() == Some(provider)
                    && t.gateway_reference.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn pending_transaction(
        &self,
        code_or_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.inner.state.lock();
        Ok(state
            .transactions
            .values()
            .map(|v| &v.value)
            .filter(|t| t.status == TransactionStatus::Pending)
            .find(|t| {
                t.code.as_str() == code_or_reference
                    || t.gateway_reference.as_deref() == Some(code_or_reference)
            })
            .cloned())
    }

    async fn stale_pending_transfers(
        &self,
        dispatched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.inner.state.lock();
        let mut stale: Vec<Transaction> = state
            .transactions
            .values()
            .map(|v| &v.value)
            .filter(|t| {
                t.transaction_type == TransactionType::TransferToBank
                    && t.status == TransactionStatus::Pending
                    && t.last_dispatched_at.is_none_or(|at| at < dispatched_before)
                    && t.created_at < dispatched_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.last_dispatched_at.unwrap_or(t.created_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn uncompensated_failures(&self, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        let state = self.inner.state.lock();
        let mut failed: Vec<Transaction> = state
            .transactions
            .values()
            .map(|v| &v.value)
            .filter(|t| {
                t.transaction_type == TransactionType::TransferToBank
                    && t.status == TransactionStatus::Failed
                    && t.compensated_at.is_none()
            })
            .cloned()
            .collect();
        failed.sort_by_key(|t| t.updated_at);
        failed.truncate(limit);
        Ok(failed)
    }

    async fn save_bulk_transfer(&self, bulk: &BulkTransfer) -> Result<(), StoreError> {
        self.inner
            .state
            .lock()
            .bulk_transfers
            .insert(bulk.id.clone(), bulk.clone());
        Ok(())
    }

    async fn bulk_transfer(&self, id: &BulkId) -> Result<Option<BulkTransfer>, StoreError> {
        Ok(self.inner.state.lock().bulk_transfers.get(id).cloned())
    }

    async fn transition_bulk_transfer(
        &self,
        bulk: &BulkTransfer,
        expected: BulkStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.state.lock();
        let slot = state
            .bulk_transfers
            .get_mut(&bulk.id)
            .ok_or_else(|| StoreError::NotFound(format!("bulk transfer {}", bulk.id)))?;
        if slot.status != expected {
            return Ok(false);
        }
        *slot = bulk.clone();
        Ok(true)
    }

    async fn save_bulk_inquiry(&self, bulk: &BulkInquiry) -> Result<(), StoreError> {
        self.inner
            .state
            .lock()
            .bulk_inquiries
            .insert(bulk.id.clone(), bulk.clone());
        Ok(())
    }

    async fn bulk_inquiry(&self, id: &BulkId) -> Result<Option<BulkInquiry>, StoreError> {
        Ok(self.inner.state.lock().bulk_inquiries.get(id).cloned())
    }

    async fn transition_bulk_inquiry(
        &self,
        bulk: &BulkInquiry,
        expected: BulkStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.state.lock();
        let slot = state
            .bulk_inquiries
            .get_mut(&bulk.id)
            .ok_or_else(|| StoreError::NotFound(format!("bulk inquiry {}", bulk.id)))?;
        if slot.status != expected {
            return Ok(false);
        }
        *slot = bulk.clone();
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    Open,
    /// Writes applied but the caller was told the result is unknown
    Landed,
    Finished,
}

struct PendingTransaction {
    value: Transaction,
    inserted: bool,
}

pub struct MemoryTx {
    inner: Arc<Inner>,
    phase: TxPhase,
    read_balances: FxHashMap<BalanceId, u64>,
    read_transactions: FxHashMap<TransactionCode, u64>,
    balances: FxHashMap<BalanceId, Balance>,
    transactions: FxHashMap<TransactionCode, PendingTransaction>,
    statements: Vec<Statement>,
}

impl MemoryTx {
    fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            phase: TxPhase::Open,
            read_balances: FxHashMap::default(),
            read_transactions: FxHashMap::default(),
            balances: FxHashMap::default(),
            transactions: FxHashMap::default(),
            statements: Vec::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.phase == TxPhase::Open {
            Ok(())
        } else {
            Err(StoreError::Corrupt("unit already finished".into()))
        }
    }

    /// Check read versions and uniqueness, then apply. Caller holds the lock.
    fn apply(&mut self, state: &mut MemoryState) -> Result<(), StoreError> {
        for (id, version) in &self.read_balances {
            if state.balances.get(id).map(|v| v.version) != Some(*version) {
                return Err(StoreError::Conflict(format!("balance {} changed", id)));
            }
        }
        for (code, version) in &self.read_transactions {
            if state.transactions.get(code).map(|v| v.version) != Some(*version) {
                return Err(StoreError::Conflict(format!("transaction {} changed", code)));
            }
        }
        for pending in self.transactions.values().filter(|p| p.inserted) {
            let t = &pending.value;
            if state.transactions.contains_key(&t.code) {
                return Err(StoreError::Duplicate(format!("transaction {}", t.code)));
            }
            if let Some(key) = external_key(t)
                && state.external_ids.contains_key(&key)
            {
                return Err(StoreError::Duplicate(format!("external id {}", t.external_id)));
            }
        }
        for id in self.balances.keys() {
            if !state.balances.contains_key(id) {
                return Err(StoreError::NotFound(format!("balance {}", id)));
            }
        }

        for (id, balance) in self.balances.drain() {
            if let Some(slot) = state.balances.get_mut(&id) {
                slot.value = balance;
                slot.version += 1;
            }
        }
        for (code, pending) in self.transactions.drain() {
            if let Some(key) = external_key(&pending.value) {
                state.external_ids.insert(key, code.clone());
            }
            match state.transactions.get_mut(&code) {
                Some(slot) => {
                    slot.value = pending.value;
                    slot.version += 1;
                }
                None => {
                    state.transactions.insert(
                        code,
                        Versioned {
                            value: pending.value,
                            version: 1,
                        },
                    );
                }
            }
        }
        state.statements.append(&mut self.statements);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn balance_for_update(&mut self, id: &BalanceId) -> Result<Balance, StoreError> {
        self.ensure_open()?;
        if let Some(balance) = self.balances.get(id) {
            return Ok(balance.clone());
        }
        let state = self.inner.state.lock();
        let slot = state
            .balances
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("balance {}", id)))?;
        self.read_balances.entry(id.clone()).or_insert(slot.version);
        Ok(slot.value.clone())
    }

    async fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.balances.insert(balance.id.clone(), balance.clone());
        Ok(())
    }

    async fn insert_statement(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.statements.push(statement.clone());
        Ok(())
    }

    async fn transaction_for_update(
        &mut self,
        code: &TransactionCode,
    ) -> Result<Transaction, StoreError> {
        self.ensure_open()?;
        if let Some(pending) = self.transactions.get(code) {
            return Ok(pending.value.clone());
        }
        let state = self.inner.state.lock();
        let slot = state
            .transactions
            .get(code)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", code)))?;
        self.read_transactions
            .entry(code.clone())
            .or_insert(slot.version);
        Ok(slot.value.clone())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.transactions.contains_key(&transaction.code) {
            return Err(StoreError::Duplicate(format!(
                "transaction {}",
                transaction.code
            )));
        }
        {
            let state = self.inner.state.lock();
            if state.transactions.contains_key(&transaction.code) {
                return Err(StoreError::Duplicate(format!(
                    "transaction {}",
                    transaction.code
                )));
            }
            if let Some(key) = external_key(transaction)
                && state.external_ids.contains_key(&key)
            {
                return Err(StoreError::Duplicate(format!(
                    "external id {}",
                    transaction.external_id
                )));
            }
        }
        self.transactions.insert(
            transaction.code.clone(),
            PendingTransaction {
                value: transaction.clone(),
                inserted: true,
            },
        );
        Ok(())
    }

    async fn put_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        self.ensure_open()?;
        if let Some(pending) = self.transactions.get_mut(&transaction.code) {
            pending.value = transaction.clone();
            return Ok(());
        }
        if !self.read_transactions.contains_key(&transaction.code) {
            // Blind write: pin the current version so concurrent updates conflict
            let state = self.inner.state.lock();
            let slot = state.transactions.get(&transaction.code).ok_or_else(|| {
                StoreError::NotFound(format!("transaction {}", transaction.code))
            })?;
            self.read_transactions
                .insert(transaction.code.clone(), slot.version);
        }
        self.transactions.insert(
            transaction.code.clone(),
            PendingTransaction {
                value: transaction.clone(),
                inserted: false,
            },
        );
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        match self.phase {
            TxPhase::Landed => {
                self.phase = TxPhase::Finished;
                return Ok(());
            }
            TxPhase::Finished => return Err(StoreError::Corrupt("unit already finished".into())),
            TxPhase::Open => {}
        }

        if take_fault(&self.inner.injected_conflicts) {
            self.phase = TxPhase::Finished;
            debug!("Injected write conflict");
            return Err(StoreError::Conflict("injected write conflict".into()));
        }

        let inner = self.inner.clone();
        {
            let mut state = inner.state.lock();
            let applied = self.apply(&mut state);
            if let Err(e) = applied {
                self.phase = TxPhase::Finished;
                return Err(e);
            }
        }
        inner.commits.fetch_add(1, Ordering::SeqCst);

        if take_fault(&inner.injected_unknown_results) {
            self.phase = TxPhase::Landed;
            debug!("Injected lost commit acknowledgment");
            return Err(StoreError::UnknownCommitResult(
                "injected lost acknowledgment".into(),
            ));
        }

        self.phase = TxPhase::Finished;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.balances.clear();
        self.transactions.clear();
        self.statements.clear();
        self.phase = TxPhase::Finished;
        Ok(())
    }
}
