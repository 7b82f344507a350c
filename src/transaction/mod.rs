//! Transaction records and status values

pub mod state;
pub mod types;

pub use state::{ProviderStatus, TransactionStatus};
pub use types::{
    BankDestination, GatewayHistory, GatewayStrategy, Transaction, TransactionMethod,
    TransactionType,
};
