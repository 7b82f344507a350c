//! Outbound notifications
//!
//! Delivery transport (webhook, SMS, push) belongs to the callback service.
//! The ledger only reports settled outcomes through [`Notifier`].

use async_trait::async_trait;
use tracing::info;

use crate::bulk::types::{BulkInquiry, BulkTransfer};
use crate::error::LedgerError;
use crate::transaction::Transaction;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A transaction reached `Completed` or `Failed`
    async fn transaction_settled(&self, transaction: &Transaction) -> Result<(), LedgerError>;

    async fn bulk_transfer_completed(&self, bulk: &BulkTransfer) -> Result<(), LedgerError>;

    async fn bulk_inquiry_completed(&self, bulk: &BulkInquiry) -> Result<(), LedgerError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn transaction_settled(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        info!(
            code = %transaction.code,
            transaction_type = %transaction.transaction_type,
            status = %transaction.status,
            amount = transaction.amount,
            external_id = %transaction.external_id,
            "Transaction settled"
        );
        Ok(())
    }

    async fn bulk_transfer_completed(&self, bulk: &BulkTransfer) -> Result<(), LedgerError> {
        info!(
            bulk_id = %bulk.id,
            total = bulk.total_count,
            succeeded = bulk.succeeded_count(),
            failed = bulk.failed_numbers.len(),
            "Bulk transfer completed"
        );
        Ok(())
    }

    async fn bulk_inquiry_completed(&self, bulk: &BulkInquiry) -> Result<(), LedgerError> {
        info!(
            bulk_id = %bulk.id,
            total = bulk.total_count,
            failed = bulk.failed_numbers.len(),
            "Bulk inquiry completed"
        );
        Ok(())
    }
}
