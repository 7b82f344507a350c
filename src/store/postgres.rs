//! PostgreSQL ledger store
//!
//! Every unit runs SERIALIZABLE and reads mutation targets `FOR UPDATE`.
//! Serialization failures surface as `Conflict` and the commit protocol
//! re-runs the unit. Each unit writes a marker row into `ledger_units_tb`
//! before committing, so a commit whose acknowledgment was lost can be
//! resolved by looking the marker up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::time::Duration;
use tracing::{info, warn};

use super::{LedgerStore, LedgerTx, PageRequest, StoreError, schema};
use crate::actor::ActorKind;
use crate::bulk::types::{BulkInquiry, BulkStatus, BulkTransfer};
use crate::core_types::{
    ActorId, BalanceId, BulkId, CorporateId, ProviderCode, StatementId, TransactionCode,
};
use crate::ledger::{Balance, Statement, StatementType};
use crate::transaction::{Transaction, TransactionStatus, TransactionType};

const BALANCE_COLUMNS: &str = "balance_id, corporate_id, owner_type, owner_id, name, amount, \
     currency, account_numbers, created_at, updated_at";

const STATEMENT_COLUMNS: &str = "statement_id, balance_id, reference, description, withdraw, \
     deposit, balance, statement_type, created_at";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        info!(max_connections, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        schema::init_schema(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn balance_from_row(row: &PgRow) -> Result<Balance, StoreError> {
    let owner_type: i16 = row.try_get("owner_type")?;
    Ok(Balance {
        id: BalanceId::new(row.try_get::<String, _>("balance_id")?),
        corporate_id: CorporateId::new(row.try_get::<String, _>("corporate_id")?),
        owner_type: ActorKind::from_id(owner_type)
            .ok_or_else(|| StoreError::Corrupt(format!("owner_type {}", owner_type)))?,
        owner_id: ActorId::new(row.try_get::<String, _>("owner_id")?),
        name: row.try_get("name")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        account_numbers: row.try_get("account_numbers")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn statement_from_row(row: &PgRow) -> Result<Statement, StoreError> {
    let statement_type: i16 = row.try_get("statement_type")?;
    Ok(Statement {
        id: StatementId::new(row.try_get::<String, _>("statement_id")?),
        balance_id: BalanceId::new(row.try_get::<String, _>("balance_id")?),
        created_at: row.try_get("created_at")?,
        description: row.try_get("description")?,
        reference: TransactionCode::new(row.try_get::<String, _>("reference")?),
        withdraw: row.try_get("withdraw")?,
        deposit: row.try_get("deposit")?,
        balance: row.try_get("balance")?,
        statement_type: StatementType::from_id(statement_type)
            .ok_or_else(|| StoreError::Corrupt(format!("statement_type {}", statement_type)))?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let Json(transaction): Json<Transaction> = row.try_get("doc")?;
    Ok(transaction)
}

fn external_id(transaction: &Transaction) -> Option<&str> {
    (!transaction.external_id.is_empty()).then_some(transaction.external_id.as_str())
}

/// Errors after which the server may or may not have applied the commit
fn is_connection_loss(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed | sqlx::Error::Protocol(_)
    )
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx {
            pool: self.pool.clone(),
            tx: Some(tx),
            unit_id: ulid::Ulid::new().to_string(),
            awaiting_ack: false,
        }))
    }

    async fn create_balance(&self, balance: &Balance) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO balances_tb ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            BALANCE_COLUMNS
        ))
        .bind(balance.id.as_str())
        .bind(balance.corporate_id.as_str())
        .bind(balance.owner_type.id())
        .bind(balance.owner_id.as_str())
        .bind(&balance.name)
        .bind(balance.amount)
        .bind(&balance.currency)
        .bind(&balance.account_numbers)
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn balance(&self, id: &BalanceId) -> Result<Option<Balance>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM balances_tb WHERE balance_id = $1",
            BALANCE_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn statements(
        &self,
        balance_id: &BalanceId,
        page: PageRequest,
    ) -> Result<Vec<Statement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM statements_tb WHERE balance_id = $1 ORDER BY seq DESC LIMIT $2 OFFSET $3",
            STATEMENT_COLUMNS
        ))
        .bind(balance_id.as_str())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(statement_from_row).collect()
    }

    async fn statements_by_reference(
        &self,
        reference: &TransactionCode,
    ) -> Result<Vec<Statement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM statements_tb WHERE reference = $1 ORDER BY seq ASC",
            STATEMENT_COLUMNS
        ))
        .bind(reference.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(statement_from_row).collect()
    }

    async fn transaction(&self, code: &TransactionCode) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT doc FROM transactions_tb WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transaction_by_external_id(
        &self,
        corporate_id: &CorporateId,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(
            "SELECT doc FROM transactions_tb WHERE corporate_id = $1 AND external_id = $2",
        )
        .bind(corporate_id.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transaction_by_gateway_reference(
        &self,
        provider: &ProviderCode,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(
            "SELECT doc FROM transactions_tb WHERE gateway_provider = $1 AND gateway_reference = $2 \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(provider.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn pending_transaction(
        &self,
        code_or_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(
            "SELECT doc FROM transactions_tb \
             WHERE status = $1 AND (code = $2 OR gateway_reference = $2) LIMIT 1",
        )
        .bind(TransactionStatus::Pending.id())
        .bind(code_or_reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn stale_pending_transfers(
        &self,
        dispatched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM transactions_tb \
             WHERE transaction_type = $1 AND status = $2 \
               AND (last_dispatched_at IS NULL OR last_dispatched_at < $3) \
               AND created_at < $3 \
             ORDER BY COALESCE(last_dispatched_at, created_at) ASC LIMIT $4",
        )
        .bind(TransactionType::TransferToBank.id())
        .bind(TransactionStatus::Pending.id())
        .bind(dispatched_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn uncompensated_failures(&self, limit: usize) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT doc FROM transactions_tb \
             WHERE transaction_type = $1 AND status = $2 AND compensated_at IS NULL \
             ORDER BY updated_at ASC LIMIT $3",
        )
        .bind(TransactionType::TransferToBank.id())
        .bind(TransactionStatus::Failed.id())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn save_bulk_transfer(&self, bulk: &BulkTransfer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bulk_transfers_tb (bulk_id, corporate_id, status, updated_at, doc) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (bulk_id) DO UPDATE \
             SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at, doc = EXCLUDED.doc",
        )
        .bind(bulk.id.as_str())
        .bind(bulk.corporate_id.as_str())
        .bind(bulk.status as i16)
        .bind(bulk.updated_at)
        .bind(Json(bulk))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_bulk_transfer(
        &self,
        bulk: &BulkTransfer,
        expected: BulkStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bulk_transfers_tb SET status = $2, updated_at = $3, doc = $4 \
             WHERE bulk_id = $1 AND status = $5",
        )
        .bind(bulk.id.as_str())
        .bind(bulk.status as i16)
        .bind(bulk.updated_at)
        .bind(Json(bulk))
        .bind(expected as i16)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn bulk_transfer(&self, id: &BulkId) -> Result<Option<BulkTransfer>, StoreError> {
        let row = sqlx::query("SELECT doc FROM bulk_transfers_tb WHERE bulk_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(bulk): Json<BulkTransfer> = row.try_get("doc")?;
                Ok(Some(bulk))
            }
            None => Ok(None),
        }
    }

    async fn save_bulk_inquiry(&self, bulk: &BulkInquiry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bulk_inquiries_tb (bulk_id, corporate_id, status, updated_at, doc) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (bulk_id) DO UPDATE \
             SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at, doc = EXCLUDED.doc",
        )
        .bind(bulk.id.as_str())
        .bind(bulk.corporate_id.as_str())
        .bind(bulk.status as i16)
        .bind(bulk.updated_at)
        .bind(Json(bulk))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_bulk_inquiry(
        &self,
        bulk: &BulkInquiry,
        expected: BulkStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bulk_inquiries_tb SET status = $2, updated_at = $3, doc = $4 \
             WHERE bulk_id = $1 AND status = $5",
        )
        .bind(bulk.id.as_str())
        .bind(bulk.status as i16)
        .bind(bulk.updated_at)
        .bind(Json(bulk))
        .bind(expected as i16)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn prune_commit_markers(
        &self,
        committed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM ledger_units_tb WHERE committed_at < $1")
            .bind(committed_before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn bulk_inquiry(&self, id: &BulkId) -> Result<Option<BulkInquiry>, StoreError> {
        let row = sqlx::query("SELECT doc FROM bulk_inquiries_tb WHERE bulk_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(bulk): Json<BulkInquiry> = row.try_get("doc")?;
                Ok(Some(bulk))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// Unit
// ============================================================================

pub struct PgTx {
    pool: PgPool,
    /// `None` once committed or rolled back
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    unit_id: String,
    /// The last commit lost its acknowledgment
    awaiting_ack: bool,
}

impl PgTx {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable(format!("unit {} already finished", self.unit_id)))
    }

    /// Did the unit whose commit acknowledgment was lost land?
    async fn resolve_commit(&mut self) -> Result<(), StoreError> {
        let landed = sqlx::query("SELECT 1 FROM ledger_units_tb WHERE unit_id = $1")
            .bind(&self.unit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::UnknownCommitResult(e.to_string()))?;
        self.awaiting_ack = false;
        match landed {
            Some(_) => {
                info!(unit_id = %self.unit_id, "Unacknowledged commit confirmed");
                Ok(())
            }
            // Nothing was applied: re-run the unit from a fresh read
            None => Err(StoreError::Conflict(format!(
                "unit {} did not commit",
                self.unit_id
            ))),
        }
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn balance_for_update(&mut self, id: &BalanceId) -> Result<Balance, StoreError> {
        let tx = self.open()?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM balances_tb WHERE balance_id = $1 FOR UPDATE",
            BALANCE_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("balance {}", id)))?;
        balance_from_row(&row)
    }

    async fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        let tx = self.open()?;
        let result = sqlx::query(
            "UPDATE balances_tb SET amount = $2, name = $3, account_numbers = $4, updated_at = $5 \
             WHERE balance_id = $1",
        )
        .bind(balance.id.as_str())
        .bind(balance.amount)
        .bind(&balance.name)
        .bind(&balance.account_numbers)
        .bind(balance.updated_at)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("balance {}", balance.id)));
        }
        Ok(())
    }

    async fn insert_statement(&mut self, statement: &Statement) -> Result<(), StoreError> {
        let tx = self.open()?;
        sqlx::query(&format!(
            "INSERT INTO statements_tb ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            STATEMENT_COLUMNS
        ))
        .bind(statement.id.as_str())
        .bind(statement.balance_id.as_str())
        .bind(statement.reference.as_str())
        .bind(&statement.description)
        .bind(statement.withdraw)
        .bind(statement.deposit)
        .bind(statement.balance)
        .bind(statement.statement_type.id())
        .bind(statement.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn transaction_for_update(
        &mut self,
        code: &TransactionCode,
    ) -> Result<Transaction, StoreError> {
        let tx = self.open()?;
        let row = sqlx::query("SELECT doc FROM transactions_tb WHERE code = $1 FOR UPDATE")
            .bind(code.as_str())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", code)))?;
        transaction_from_row(&row)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let tx = self.open()?;
        sqlx::query(
            "INSERT INTO transactions_tb (code, external_id, corporate_id, transaction_type, \
             status, gateway_provider, gateway_reference, last_dispatched_at, compensated_at, \
             created_at, updated_at, doc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(transaction.code.as_str())
        .bind(external_id(transaction))
        .bind(transaction.corporate_id.as_str())
        .bind(transaction.transaction_type.id())
        .bind(transaction.status.id())
        .bind(transaction.gateway_provider.as_ref().map(|p| p.as_str()))
        .bind(transaction.gateway_reference.as_deref())
        .bind(transaction.last_dispatched_at)
        .bind(transaction.compensated_at)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .bind(Json(transaction))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn put_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let tx = self.open()?;
        let result = sqlx::query(
            "UPDATE transactions_tb SET status = $2, gateway_provider = $3, gateway_reference = $4, \
             last_dispatched_at = $5, compensated_at = $6, updated_at = $7, doc = $8 \
             WHERE code = $1",
        )
        .bind(transaction.code.as_str())
        .bind(transaction.status.id())
        .bind(transaction.gateway_provider.as_ref().map(|p| p.as_str()))
        .bind(transaction.gateway_reference.as_deref())
        .bind(transaction.last_dispatched_at)
        .bind(transaction.compensated_at)
        .bind(transaction.updated_at)
        .bind(Json(transaction))
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {}", transaction.code)));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.awaiting_ack {
            return self.resolve_commit().await;
        }
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Unavailable(format!("unit {} already finished", self.unit_id)))?;
        sqlx::query("INSERT INTO ledger_units_tb (unit_id) VALUES ($1)")
            .bind(&self.unit_id)
            .execute(&mut *tx)
            .await?;
        match tx.commit().await {
            Ok(()) => Ok(()),
            Err(e) if is_connection_loss(&e) => {
                warn!(unit_id = %self.unit_id, error = %e, "Commit acknowledgment lost");
                self.awaiting_ack = true;
                Err(StoreError::UnknownCommitResult(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
