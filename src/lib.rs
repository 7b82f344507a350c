//! Wallet Ledger - Multi-tenant wallet ledger and disbursement engine
//!
//! Every money movement is recorded as immutable statements against
//! balances, committed atomically with its transaction record. Bank
//! disbursements are routed through an ordered queue of payment providers
//! with automatic failover and compensation.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier newtypes and the minor-unit amount
//! - [`ledger`] - Balances, statements, the statement ledger
//! - [`store`] - Ledger store trait, in-memory and PostgreSQL backends
//! - [`commit`] - Unit-of-work retry protocol
//! - [`actor`] - Users, corporate operators, credential verification
//! - [`fee`] - Corporate fee schedules and fee statements
//! - [`transaction`] - Transaction record and status machine
//! - [`usecase`] - Topup, deduct, transfers, QR, biller, card acceptance
//! - [`gateway`] - Provider integrations, routing, failover engine
//! - [`bulk`] - Bulk transfers and bulk account inquiries
//! - [`tasks`] - At-least-once follow-up task queue
//! - [`worker`] - Recovery scan for stalled and uncompensated transfers
//! - [`wallet`] - Composition root

// Core types - must be first!
pub mod core_types;
pub mod error;

// Ledger
pub mod commit;
pub mod ledger;
pub mod store;

// Money movement
pub mod actor;
pub mod bulk;
pub mod fee;
pub mod gateway;
pub mod transaction;
pub mod usecase;

// Runtime
pub mod config;
pub mod logging;
pub mod notify;
pub mod tasks;
pub mod wallet;
pub mod worker;

#[cfg(test)]
mod test_support;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{
    ActorId, Amount, BalanceId, BulkId, CorporateId, ProviderCode, StatementId, TransactionCode,
};
pub use error::LedgerError;
pub use ledger::{Balance, Statement, StatementLedger, StatementType};
pub use store::{LedgerStore, LedgerTx, StoreError};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use wallet::{WalletDeps, WalletLedger};
