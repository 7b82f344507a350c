//! Balances and the append-only statement ledger
//!
//! # Invariants
//!
//! 1. `Balance::amount >= 0` after every committed statement
//! 2. `amount == sum(deposit) - sum(withdraw)` over the balance's statements
//! 3. A movement between two balances is a withdraw/deposit pair sharing
//!    reference and timestamp, written in one unit

pub mod statement;
pub mod types;

pub use statement::StatementLedger;
pub use types::{Balance, Statement, StatementType};
