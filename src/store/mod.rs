//! Ledger Store
//!
//! Persistence for balances, statements, transactions and bulk batches.
//! Reads that feed a mutation go through an open [`LedgerTx`]; everything
//! written through one `LedgerTx` becomes visible atomically on `commit`.
//!
//! Two backends:
//! - [`memory::MemoryStore`]: optimistic concurrency over versioned records,
//!   with fault injection for tests and the sandbox
//! - [`postgres::PgLedgerStore`]: SERIALIZABLE PostgreSQL units

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bulk::types::{BulkInquiry, BulkStatus, BulkTransfer};
use crate::core_types::{BalanceId, BulkId, CorporateId, ProviderCode, TransactionCode};
use crate::ledger::{Balance, Statement};
use crate::transaction::Transaction;

/// Store failure classes
///
/// The commit protocol decides between "re-run the unit", "re-send the
/// commit" and "give up" purely on the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another unit changed data this unit read. Re-run from a fresh read.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The commit was sent but its acknowledgment was lost.
    #[error("Unknown commit result: {0}")]
    UnknownCommitResult(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Transient classes: the same work may succeed if tried again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::UnknownCommitResult(_)
                | StoreError::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Conflict(db.message().to_string()),
                // unique_violation
                Some("23505") => StoreError::Duplicate(db.message().to_string()),
                _ => StoreError::Unavailable(e.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// One page of a history query, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.per_page as usize
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.per_page as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// Store handle, shared by every component.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a new atomic unit
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    /// Register a new balance. Fails with `Duplicate` if the id exists.
    async fn create_balance(&self, balance: &Balance) -> Result<(), StoreError>;

    async fn balance(&self, id: &BalanceId) -> Result<Option<Balance>, StoreError>;

    /// Statement history of one balance, newest first
    async fn statements(
        &self,
        balance_id: &BalanceId,
        page: PageRequest,
    ) -> Result<Vec<Statement>, StoreError>;

    /// All statements carrying `reference`, in application order
    async fn statements_by_reference(
        &self,
        reference: &TransactionCode,
    ) -> Result<Vec<Statement>, StoreError>;

    async fn transaction(&self, code: &TransactionCode) -> Result<Option<Transaction>, StoreError>;

    /// External ids are unique per corporate, not globally
    async fn transaction_by_external_id(
        &self,
        corporate_id: &CorporateId,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Transaction whose current attempt at `provider` carries `reference`
    async fn transaction_by_gateway_reference(
        &self,
        provider: &ProviderCode,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Pending transaction whose code or current gateway reference matches
    async fn pending_transaction(
        &self,
        code_or_reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Pending bank transfers last dispatched before `dispatched_before`, oldest first
    async fn stale_pending_transfers(
        &self,
        dispatched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Failed bank transfers whose restitution has not been written yet
    async fn uncompensated_failures(&self, limit: usize) -> Result<Vec<Transaction>, StoreError>;

    /// Insert or replace a bulk transfer batch
    async fn save_bulk_transfer(&self, bulk: &BulkTransfer) -> Result<(), StoreError>;

    async fn bulk_transfer(&self, id: &BulkId) -> Result<Option<BulkTransfer>, StoreError>;

    /// Replace a stored batch only while its status is still `expected`.
    /// `Ok(false)` when another writer moved it first.
    async fn transition_bulk_transfer(
        &self,
        bulk: &BulkTransfer,
        expected: BulkStatus,
    ) -> Result<bool, StoreError>;

    /// Insert or replace a bulk inquiry batch
    async fn save_bulk_inquiry(&self, bulk: &BulkInquiry) -> Result<(), StoreError>;

    async fn bulk_inquiry(&self, id: &BulkId) -> Result<Option<BulkInquiry>, StoreError>;

    async fn transition_bulk_inquiry(
        &self,
        bulk: &BulkInquiry,
        expected: BulkStatus,
    ) -> Result<bool, StoreError>;

    /// Drop commit-acknowledgment markers of units committed before
    /// `committed_before`. Returns how many were removed.
    async fn prune_commit_markers(
        &self,
        committed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let _ = committed_before;
        Ok(0)
    }
}

/// An open atomic unit.
///
/// Reads see the unit's own earlier writes. Nothing is visible to other
/// units before `commit` returns `Ok`.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read a balance for mutation. `NotFound` if it does not exist.
    async fn balance_for_update(&mut self, id: &BalanceId) -> Result<Balance, StoreError>;

    async fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError>;

    async fn insert_statement(&mut self, statement: &Statement) -> Result<(), StoreError>;

    /// Read a transaction for mutation. `NotFound` if it does not exist.
    async fn transaction_for_update(
        &mut self,
        code: &TransactionCode,
    ) -> Result<Transaction, StoreError>;

    /// `Duplicate` if the code or the non-empty external id is taken.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn put_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Make every write of this unit visible.
    ///
    /// After `UnknownCommitResult` the same unit may be committed again; the
    /// second call reports whether the first one landed.
    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
