//! Transaction Commit Protocol
//!
//! Every balance mutation runs as a unit of work:
//!
//! ```text
//! begin -> unit(tx) -> commit
//!            |           |
//!            |           +-- UnknownCommitResult: re-send commit only
//!            |           +-- Conflict: re-run the whole unit (fresh reads)
//!            +-- Err(conflict): re-run the whole unit
//!            +-- Err(other): rollback, surface untouched
//! ```
//!
//! A unit must be side-effect free outside its `LedgerTx`: it may run
//! several times before one attempt commits.

use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core_types::TransactionCode;
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementLedger};
use crate::store::{LedgerStore, LedgerTx, StoreError};
use crate::transaction::Transaction;

/// Retry policy for units of work
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries conflicts until the unit commits
    pub max_attempts: Option<u32>,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Commit re-sends after an unknown commit result
    pub commit_ack_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            commit_ack_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before attempt `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

#[derive(Clone)]
pub struct CommitProtocol {
    store: Arc<dyn LedgerStore>,
    policy: RetryPolicy,
}

impl CommitProtocol {
    pub fn new(store: Arc<dyn LedgerStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Run `unit` atomically, re-running it from scratch on write conflicts.
    ///
    /// `label` only tags log lines.
    pub async fn run_unit<T, F>(&self, label: &'static str, mut unit: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'a> FnMut(&'a mut dyn LedgerTx) -> BoxFuture<'a, Result<T, LedgerError>> + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut tx = self.store.begin().await?;

            let error = match unit(tx.as_mut()).await {
                Ok(value) => match self.commit_acknowledged(tx.as_mut()).await {
                    Ok(()) => {
                        if attempt > 1 {
                            debug!(unit = label, attempts = attempt, "Unit committed after retry");
                        }
                        return Ok(value);
                    }
                    Err(e) => LedgerError::Store(e),
                },
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!(unit = label, error = %rb, "Rollback failed");
                    }
                    e
                }
            };

            if !error.is_retryable() || self.policy.exhausted(attempt) {
                return Err(error);
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                unit = label,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Write conflict, re-running unit"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Commit, re-sending only the commit on an unknown result.
    async fn commit_acknowledged(&self, tx: &mut dyn LedgerTx) -> Result<(), StoreError> {
        let mut resent = 0;
        loop {
            match tx.commit().await {
                Ok(()) => return Ok(()),
                Err(StoreError::UnknownCommitResult(msg))
                    if resent < self.policy.commit_ack_attempts =>
                {
                    resent += 1;
                    warn!(attempt = resent, reason = %msg, "Unknown commit result, re-sending commit");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persist `transaction` and apply `statements` in order, atomically.
    ///
    /// Returns the statements with their post-mutation balances.
    pub async fn commit(
        &self,
        statements: Vec<Statement>,
        transaction: Transaction,
    ) -> Result<Vec<Statement>, LedgerError> {
        let code = transaction.code.clone();
        let applied = self
            .run_unit("commit", |tx| {
                let statements = statements.clone();
                let transaction = transaction.clone();
                Box::pin(async move {
                    tx.insert_transaction(&transaction).await?;
                    StatementLedger::apply_all(tx, statements).await
                })
            })
            .await?;
        debug!(code = %code, statements = applied.len(), "Transaction committed");
        Ok(applied)
    }

    /// Apply compensating statements for an existing transaction.
    ///
    /// The transaction's `compensated_at` marker is checked and set in the
    /// same unit, so restitution lands at most once. A second call fails
    /// with `AlreadyCompensated`.
    pub async fn commit_rollback(
        &self,
        code: &TransactionCode,
        statements: Vec<Statement>,
    ) -> Result<Vec<Statement>, LedgerError> {
        let code = code.clone();
        self.run_unit("commit_rollback", |tx| {
            let statements = statements.clone();
            let code = code.clone();
            Box::pin(async move {
                let mut transaction = load_transaction(tx, &code).await?;
                if transaction.compensated_at.is_some() {
                    return Err(LedgerError::AlreadyCompensated(code));
                }
                let now = Utc::now();
                transaction.compensated_at = Some(now);
                transaction.updated_at = now;
                tx.put_transaction(&transaction).await?;
                StatementLedger::apply_all(tx, statements).await
            })
        })
        .await
    }
}

/// Read a transaction for mutation inside a unit.
pub async fn load_transaction(
    tx: &mut dyn LedgerTx,
    code: &TransactionCode,
) -> Result<Transaction, LedgerError> {
    match tx.transaction_for_update(code).await {
        Ok(t) => Ok(t),
        Err(StoreError::NotFound(_)) => Err(LedgerError::TransactionNotFound(code.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::BalanceId;
    use crate::ledger::StatementType;
    use crate::store::memory::MemoryStore;
    use crate::test_support::{open_balance, sample_transaction};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(10),
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            commit_ack_attempts: 3,
        }
    }

    fn pair(from: &str, to: &str, amount: i64, t: &Transaction) -> Vec<Statement> {
        Statement::transfer_pair(
            BalanceId::new(from),
            BalanceId::new(to),
            amount,
            t.code.clone(),
            "Transfer",
            StatementType::Transaction,
            Utc::now(),
        )
        .to_vec()
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = fast_policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(1));
        assert_eq!(policy.backoff(2), Duration::from_millis(2));
        assert_eq!(policy.backoff(30), Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100).await;
        open_balance(&store, "b", 0).await;
        let protocol = CommitProtocol::new(Arc::new(store.clone()), fast_policy());

        let t = sample_transaction();
        let mut statements = pair("a", "b", 60, &t);
        // Second withdraw fails the balance check; nothing may land
        statements.push(Statement::withdraw(
            BalanceId::new("a"),
            60,
            t.code.clone(),
            "Fee",
            StatementType::Fee,
            Utc::now(),
        ));
        let err = protocol.commit(statements, t.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        assert_eq!(store.balance(&BalanceId::new("a")).await.unwrap().unwrap().amount, 100);
        assert_eq!(store.balance(&BalanceId::new("b")).await.unwrap().unwrap().amount, 0);
        assert!(store.transaction(&t.code).await.unwrap().is_none());
        assert!(store.statements_by_reference(&t.code).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_reruns_unit_from_fresh_read() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100).await;
        let protocol = CommitProtocol::new(Arc::new(store.clone()), fast_policy());
        store.inject_conflicts(2);

        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let seen = protocol
            .run_unit("test", move |tx| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let b = tx.balance_for_update(&BalanceId::new("a")).await?;
                    Ok(b.amount)
                })
            })
            .await
            .unwrap();

        assert_eq!(seen, 100);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let store = MemoryStore::new();
        let protocol = CommitProtocol::new(Arc::new(store.clone()), fast_policy());
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();

        let err = protocol
            .run_unit("test", move |_tx| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(LedgerError::InvalidAmount)
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidAmount));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_commit_result_resends_commit_only() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100).await;
        open_balance(&store, "b", 0).await;
        let protocol = CommitProtocol::new(Arc::new(store.clone()), fast_policy());
        let commits_before = store.commit_count();
        let begins_before = store.begin_count();
        store.inject_unknown_commit_results(1);

        let t = sample_transaction();
        protocol.commit(pair("a", "b", 40, &t), t.clone()).await.unwrap();

        // One unit, applied once
        assert_eq!(store.begin_count() - begins_before, 1);
        assert_eq!(store.commit_count() - commits_before, 1);
        assert_eq!(store.balance(&BalanceId::new("a")).await.unwrap().unwrap().amount, 60);
        assert_eq!(store.statements_by_reference(&t.code).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_attempts_surface_conflict() {
        let store = MemoryStore::new();
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..fast_policy()
        };
        let protocol = CommitProtocol::new(Arc::new(store.clone()), policy);
        store.inject_conflicts(5);

        let err = protocol
            .run_unit("test", |_tx| Box::pin(async move { Ok(()) }))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_commit_rollback_applies_once() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100).await;
        let protocol = CommitProtocol::new(Arc::new(store.clone()), fast_policy());

        let t = sample_transaction();
        let withdraw = Statement::withdraw(
            BalanceId::new("a"),
            30,
            t.code.clone(),
            "Transfer to bank",
            StatementType::Transaction,
            Utc::now(),
        );
        protocol.commit(vec![withdraw.clone()], t.clone()).await.unwrap();

        let restitution = vec![withdraw.reversed(Utc::now())];
        protocol
            .commit_rollback(&t.code, restitution.clone())
            .await
            .unwrap();
        let err = protocol
            .commit_rollback(&t.code, restitution)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyCompensated(_)));

        assert_eq!(store.balance(&BalanceId::new("a")).await.unwrap().unwrap().amount, 100);
        let stored = store.transaction(&t.code).await.unwrap().unwrap();
        assert!(stored.compensated_at.is_some());
    }
}
