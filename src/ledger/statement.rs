//! Statement Ledger
//!
//! The only code path that changes `Balance::amount`. Every function runs
//! inside an open [`LedgerTx`], so the read, the balance check and both
//! writes belong to the caller's atomic unit.

use chrono::Utc;
use tracing::debug;

use super::types::{Statement, StatementType};
use crate::core_types::{Amount, BalanceId, TransactionCode};
use crate::error::LedgerError;
use crate::store::{LedgerTx, StoreError};

pub struct StatementLedger;

impl StatementLedger {
    /// Debit `amount` from a balance; fails with `InsufficientBalance` if it would go negative.
    pub async fn withdraw(
        tx: &mut dyn LedgerTx,
        balance_id: &BalanceId,
        amount: Amount,
        reference: &TransactionCode,
    ) -> Result<Statement, LedgerError> {
        let draft = Statement::withdraw(
            balance_id.clone(),
            amount,
            reference.clone(),
            "Withdraw",
            StatementType::Transaction,
            Utc::now(),
        );
        Self::apply(tx, draft).await
    }

    /// Credit `amount` to a balance. Never fails the balance check.
    pub async fn deposit(
        tx: &mut dyn LedgerTx,
        balance_id: &BalanceId,
        amount: Amount,
        reference: &TransactionCode,
    ) -> Result<Statement, LedgerError> {
        let draft = Statement::deposit(
            balance_id.clone(),
            amount,
            reference.clone(),
            "Deposit",
            StatementType::Transaction,
            Utc::now(),
        );
        Self::apply(tx, draft).await
    }

    /// Apply a drafted statement and return it with its post-mutation balance.
    pub async fn apply(
        tx: &mut dyn LedgerTx,
        mut statement: Statement,
    ) -> Result<Statement, LedgerError> {
        statement.validate()?;

        let mut balance = match tx.balance_for_update(&statement.balance_id).await {
            Ok(balance) => balance,
            Err(StoreError::NotFound(_)) => {
                return Err(LedgerError::BalanceNotFound(statement.balance_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        if statement.withdraw > balance.amount {
            return Err(LedgerError::InsufficientBalance {
                balance_id: balance.id.clone(),
                available: balance.amount,
                requested: statement.withdraw,
            });
        }

        let new_amount = balance
            .amount
            .checked_sub(statement.withdraw)
            .and_then(|v| v.checked_add(statement.deposit))
            .ok_or(LedgerError::Overflow)?;

        balance.amount = new_amount;
        balance.updated_at = Utc::now();
        tx.put_balance(&balance).await?;

        statement.balance = new_amount;
        tx.insert_statement(&statement).await?;

        debug!(
            balance_id = %statement.balance_id,
            reference = %statement.reference,
            withdraw = statement.withdraw,
            deposit = statement.deposit,
            balance = new_amount,
            "Statement applied"
        );
        Ok(statement)
    }

    /// Apply statements in list order; stops at the first failure.
    pub async fn apply_all(
        tx: &mut dyn LedgerTx,
        statements: Vec<Statement>,
    ) -> Result<Vec<Statement>, LedgerError> {
        let mut applied = Vec::with_capacity(statements.len());
        for statement in statements {
            applied.push(Self::apply(tx, statement).await?);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{LedgerStore, PageRequest};
    use crate::test_support::open_balance;

    #[tokio::test]
    async fn test_withdraw_and_deposit_record_post_balance() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100_000).await;
        let reference = TransactionCode::new("TRX1");

        let mut tx = store.begin().await.unwrap();
        let w = StatementLedger::withdraw(tx.as_mut(), &BalanceId::new("a"), 30_000, &reference)
            .await
            .unwrap();
        let d = StatementLedger::deposit(tx.as_mut(), &BalanceId::new("a"), 5_000, &reference)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(w.balance, 70_000);
        assert_eq!(d.balance, 75_000);
        let balance = store.balance(&BalanceId::new("a")).await.unwrap().unwrap();
        assert_eq!(balance.amount, 75_000);
    }

    #[tokio::test]
    async fn test_overdraw_is_rejected_without_writes() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 100_000).await;

        let mut tx = store.begin().await.unwrap();
        let err = StatementLedger::withdraw(
            tx.as_mut(),
            &BalanceId::new("a"),
            150_000,
            &TransactionCode::new("TRX2"),
        )
        .await
        .unwrap_err();
        tx.rollback().await.unwrap();

        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 100_000,
                requested: 150_000,
                ..
            }
        ));
        let balance = store.balance(&BalanceId::new("a")).await.unwrap().unwrap();
        assert_eq!(balance.amount, 100_000);
        let history = store
            .statements(&BalanceId::new("a"), PageRequest::default())
            .await
            .unwrap();
        // Only the opening deposit
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].deposit, 100_000);
    }

    #[tokio::test]
    async fn test_unknown_balance() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = StatementLedger::deposit(
            tx.as_mut(),
            &BalanceId::new("missing"),
            1,
            &TransactionCode::new("TRX3"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::BalanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let store = MemoryStore::new();
        open_balance(&store, "a", 1_000).await;
        let reference = TransactionCode::new("TRX4");

        let mut tx = store.begin().await.unwrap();
        StatementLedger::withdraw(tx.as_mut(), &BalanceId::new("a"), 600, &reference)
            .await
            .unwrap();
        // Second withdraw must see 400 left, not the committed 1_000
        let err = StatementLedger::withdraw(tx.as_mut(), &BalanceId::new("a"), 600, &reference)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { available: 400, .. }
        ));
    }
}
