//! Bulk transfers and bulk account inquiries
//!
//! A batch is created `Unexecuted`, authorized once on execution, then run
//! line by line from the task queue. A failing line is recorded and the run
//! moves on.

pub mod orchestrator;
pub mod types;

pub use orchestrator::{
    BulkInquiryLine, BulkOrchestrator, BulkTransferLine, CreateBulkInquiryRequest,
    CreateBulkTransferRequest,
};
pub use types::{
    BulkExecutor, BulkInquiry, BulkInquiryItem, BulkStatus, BulkTransfer, BulkTransferItem,
    LineOutcome,
};
