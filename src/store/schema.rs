//! PostgreSQL schema
//!
//! Balances and statements are relational: reporting reads them directly.
//! Transactions and bulk batches keep their full record in a `doc` JSONB
//! column next to the indexed lookup columns.

use sqlx::PgPool;
use tracing::info;

pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS balances_tb (
        balance_id      TEXT PRIMARY KEY,
        corporate_id    TEXT NOT NULL,
        owner_type      SMALLINT NOT NULL,
        owner_id        TEXT NOT NULL,
        name            TEXT NOT NULL,
        amount          BIGINT NOT NULL CHECK (amount >= 0),
        currency        TEXT NOT NULL,
        account_numbers TEXT[] NOT NULL DEFAULT '{}',
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_balances_corporate ON balances_tb (corporate_id)"#,
    r#"CREATE TABLE IF NOT EXISTS statements_tb (
        seq             BIGSERIAL PRIMARY KEY,
        statement_id    TEXT NOT NULL UNIQUE,
        balance_id      TEXT NOT NULL REFERENCES balances_tb (balance_id),
        reference       TEXT NOT NULL,
        description     TEXT NOT NULL,
        withdraw        BIGINT NOT NULL CHECK (withdraw >= 0),
        deposit         BIGINT NOT NULL CHECK (deposit >= 0),
        balance         BIGINT NOT NULL CHECK (balance >= 0),
        statement_type  SMALLINT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_statements_balance ON statements_tb (balance_id, seq DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_statements_reference ON statements_tb (reference)"#,
    r#"CREATE TABLE IF NOT EXISTS transactions_tb (
        code                TEXT PRIMARY KEY,
        external_id         TEXT,
        corporate_id        TEXT NOT NULL,
        transaction_type    SMALLINT NOT NULL,
        status              SMALLINT NOT NULL,
        gateway_provider    TEXT,
        gateway_reference   TEXT,
        last_dispatched_at  TIMESTAMPTZ,
        compensated_at      TIMESTAMPTZ,
        created_at          TIMESTAMPTZ NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL,
        doc                 JSONB NOT NULL
    )"#,
    // Tables created before external ids were scoped per corporate
    r#"ALTER TABLE transactions_tb DROP CONSTRAINT IF EXISTS transactions_tb_external_id_key"#,
    r#"ALTER TABLE transactions_tb ADD COLUMN IF NOT EXISTS gateway_provider TEXT"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS uq_transactions_external_id
        ON transactions_tb (corporate_id, external_id) WHERE external_id IS NOT NULL"#,
    r#"DROP INDEX IF EXISTS idx_transactions_reference"#,
    r#"CREATE INDEX IF NOT EXISTS idx_transactions_gateway
        ON transactions_tb (gateway_provider, gateway_reference) WHERE gateway_reference IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_transactions_open ON transactions_tb (transaction_type, status, updated_at)"#,
    r#"CREATE TABLE IF NOT EXISTS bulk_transfers_tb (
        bulk_id         TEXT PRIMARY KEY,
        corporate_id    TEXT NOT NULL,
        status          SMALLINT NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        doc             JSONB NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS bulk_inquiries_tb (
        bulk_id         TEXT PRIMARY KEY,
        corporate_id    TEXT NOT NULL,
        status          SMALLINT NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        doc             JSONB NOT NULL
    )"#,
    // One row per committed unit, written inside the unit. Resolves commits
    // whose acknowledgment was lost; the recovery worker prunes old rows.
    r#"CREATE TABLE IF NOT EXISTS ledger_units_tb (
        unit_id         TEXT PRIMARY KEY,
        committed_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_ledger_units_committed ON ledger_units_tb (committed_at)"#,
];

/// Create every table and index that does not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "Ledger schema ready");
    Ok(())
}
