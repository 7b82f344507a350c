//! Bulk batch records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::{ActorKind, ActorSnapshot};
use crate::core_types::{ActorId, Amount, BalanceId, BulkId, CorporateId, TransactionCode};

/// Batch status: `Unexecuted -> Progress -> Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum BulkStatus {
    Unexecuted = 0,
    Progress = 10,
    Completed = 20,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkStatus::Unexecuted => "UNEXECUTED",
            BulkStatus::Progress => "PROGRESS",
            BulkStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for BulkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who authorized the run. Captured once so per-line transfers need no
/// live actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkExecutor {
    pub actor_id: ActorId,
    pub actor_kind: ActorKind,
    pub snapshot: ActorSnapshot,
}

/// Outcome slot shared by transfer and inquiry lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub processed: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkTransferItem {
    /// 1-based position in the uploaded batch
    pub number: u32,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub amount: Amount,
    pub description: String,
    pub transaction_code: Option<TransactionCode>,
    #[serde(flatten)]
    pub outcome: LineOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkTransfer {
    pub id: BulkId,
    pub corporate_id: CorporateId,
    pub owner_id: ActorId,
    pub balance_id: BalanceId,
    pub reference: String,
    pub total_count: u32,
    pub total_amount: Amount,
    pub status: BulkStatus,
    pub items: Vec<BulkTransferItem>,
    /// Numbers of the lines that failed, in processing order
    pub failed_numbers: Vec<u32>,
    pub executed_by: Option<BulkExecutor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkTransfer {
    /// Line item external id, stable across reruns of the same batch
    pub fn line_external_id(&self, number: u32) -> String {
        format!("{}-{}", self.id, number)
    }

    pub fn succeeded_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.transaction_code.is_some())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkInquiryItem {
    pub number: u32,
    pub bank_code: String,
    pub account_number: String,
    /// Name returned by the provider
    pub account_name: Option<String>,
    #[serde(flatten)]
    pub outcome: LineOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkInquiry {
    pub id: BulkId,
    pub corporate_id: CorporateId,
    pub owner_id: ActorId,
    pub reference: String,
    pub total_count: u32,
    pub status: BulkStatus,
    pub items: Vec<BulkInquiryItem>,
    pub failed_numbers: Vec<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
