//! Transaction record
//!
//! One record per money-movement operation. Bank transfers additionally
//! carry the provider strategy queue and the attempt log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::{ProviderStatus, TransactionStatus};
use crate::actor::ActorSnapshot;
use crate::core_types::{Amount, BalanceId, CorporateId, ProviderCode, TransactionCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionType {
    Topup = 1,
    Deduct = 2,
    TransferToWallet = 3,
    TransferToCash = 4,
    TransferToBank = 5,
    PayQr = 6,
    Biller = 7,
    AcceptCard = 8,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Topup),
            2 => Some(TransactionType::Deduct),
            3 => Some(TransactionType::TransferToWallet),
            4 => Some(TransactionType::TransferToCash),
            5 => Some(TransactionType::TransferToBank),
            6 => Some(TransactionType::PayQr),
            7 => Some(TransactionType::Biller),
            8 => Some(TransactionType::AcceptCard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "TOPUP",
            TransactionType::Deduct => "DEDUCT",
            TransactionType::TransferToWallet => "TRANSFER_TO_WALLET",
            TransactionType::TransferToCash => "TRANSFER_TO_CASH",
            TransactionType::TransferToBank => "TRANSFER_TO_BANK",
            TransactionType::PayQr => "PAY_QR",
            TransactionType::Biller => "BILLER",
            TransactionType::AcceptCard => "ACCEPT_CARD",
        }
    }

    /// Prefix of minted transaction codes
    pub fn code_prefix(&self) -> &'static str {
        match self {
            TransactionType::Topup => "TOP",
            TransactionType::Deduct => "DED",
            TransactionType::TransferToWallet => "TRW",
            TransactionType::TransferToCash => "TRC",
            TransactionType::TransferToBank => "TRB",
            TransactionType::PayQr => "QRP",
            TransactionType::Biller => "BIL",
            TransactionType::AcceptCard => "ACC",
        }
    }

    /// Money enters the ledger from outside. The fee is then taken out of
    /// the credited amount instead of added on top of the debit.
    #[inline]
    pub fn is_incoming(&self) -> bool {
        matches!(self, TransactionType::Topup | TransactionType::AcceptCard)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionMethod {
    Balance,
    VirtualAccount,
    Bank,
    Qr,
    Card,
    Biller,
    Manual,
}

/// One entry of the provider queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStrategy {
    pub provider: ProviderCode,
    pub is_executed: bool,
}

impl GatewayStrategy {
    pub fn new(provider: ProviderCode) -> Self {
        Self {
            provider,
            is_executed: false,
        }
    }
}

/// Append-only log entry of one provider attempt or callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHistory {
    pub provider: ProviderCode,
    pub reference: Option<String>,
    pub status: ProviderStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bank account a transfer-to-bank pays out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDestination {
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub code: TransactionCode,
    pub corporate_id: CorporateId,
    pub transaction_type: TransactionType,
    pub method: TransactionMethod,
    pub source_balance_id: Option<BalanceId>,
    pub destination_balance_id: Option<BalanceId>,
    pub source: ActorSnapshot,
    pub destination: ActorSnapshot,
    pub sub_amount: Amount,
    pub total_fee: Amount,
    /// `sub_amount + total_fee` for outgoing, `sub_amount - total_fee` for incoming
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub external_id: String,
    pub description: String,
    pub bank_destination: Option<BankDestination>,
    pub gateway_provider: Option<ProviderCode>,
    pub gateway_reference: Option<String>,
    #[serde(default)]
    pub gateway_strategies: Vec<GatewayStrategy>,
    #[serde(default)]
    pub gateway_histories: Vec<GatewayHistory>,
    pub compensated_at: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Fresh record with a newly minted code. Amounts start at zero and the
    /// status at `Completed`; bank transfers switch to `Pending`.
    pub fn new(
        transaction_type: TransactionType,
        method: TransactionMethod,
        corporate_id: CorporateId,
        source: ActorSnapshot,
        destination: ActorSnapshot,
        currency: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            code: TransactionCode::generate(transaction_type.code_prefix()),
            corporate_id,
            transaction_type,
            method,
            source_balance_id: None,
            destination_balance_id: None,
            source,
            destination,
            sub_amount: 0,
            total_fee: 0,
            amount: 0,
            currency: currency.into(),
            status: TransactionStatus::Completed,
            external_id: external_id.into(),
            description: String::new(),
            bank_destination: None,
            gateway_provider: None,
            gateway_reference: None,
            gateway_strategies: Vec::new(),
            gateway_histories: Vec::new(),
            compensated_at: None,
            last_dispatched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The balance that pays the fee
    pub fn fee_payer(&self) -> Option<&BalanceId> {
        if self.transaction_type.is_incoming() {
            self.destination_balance_id.as_ref()
        } else {
            self.source_balance_id.as_ref()
        }
    }

    // === Strategy queue ===

    /// First strategy not yet attempted
    pub fn next_strategy(&self) -> Option<&GatewayStrategy> {
        self.gateway_strategies.iter().find(|s| !s.is_executed)
    }

    #[inline]
    pub fn strategies_exhausted(&self) -> bool {
        self.next_strategy().is_none()
    }

    /// Mark the next strategy executed and make it the current provider.
    ///
    /// Clears the stored reference so late callbacks for the previous
    /// provider no longer match.
    pub fn claim_next_strategy(&mut self, now: DateTime<Utc>) -> Option<ProviderCode> {
        let strategy = self.gateway_strategies.iter_mut().find(|s| !s.is_executed)?;
        strategy.is_executed = true;
        let provider = strategy.provider.clone();
        self.gateway_provider = Some(provider.clone());
        self.gateway_reference = None;
        self.last_dispatched_at = Some(now);
        self.updated_at = now;
        Some(provider)
    }

    /// Current provider when its call was claimed but neither a reference
    /// nor a failure was recorded, i.e. the call outcome is unknown.
    pub fn in_flight_provider(&self) -> Option<&ProviderCode> {
        let provider = self.gateway_provider.as_ref()?;
        if self.gateway_reference.is_some() {
            return None;
        }
        let failed = self
            .gateway_histories
            .last()
            .is_some_and(|h| &h.provider == provider && h.status.is_failure());
        if failed { None } else { Some(provider) }
    }

    /// Append an attempt to the history unless it repeats the last entry.
    pub fn record_gateway_history(
        &mut self,
        provider: ProviderCode,
        reference: Option<String>,
        status: ProviderStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        let repeated = self.gateway_histories.last().is_some_and(|last| {
            last.provider == provider && last.reference == reference && last.status == status
        });
        if repeated {
            return;
        }
        self.gateway_histories.push(GatewayHistory {
            provider,
            reference,
            status,
            error,
            created_at: now,
        });
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::PartyType;

    fn bank_transfer() -> Transaction {
        let mut t = Transaction::new(
            TransactionType::TransferToBank,
            TransactionMethod::Bank,
            CorporateId::new("c1"),
            ActorSnapshot::new(PartyType::User, "c1", "Ana", "880"),
            ActorSnapshot::new(PartyType::Bank, "014", "Budi", "123"),
            "IDR",
            "ext-1",
        );
        t.status = TransactionStatus::Pending;
        t.gateway_strategies = ["p1", "p2", "p3"]
            .iter()
            .map(|p| GatewayStrategy::new(ProviderCode::new(*p)))
            .collect();
        t
    }

    #[test]
    fn test_code_prefix() {
        let t = bank_transfer();
        assert!(t.code.as_str().starts_with("TRB"));
    }

    #[test]
    fn test_claim_walks_queue_in_order() {
        let mut t = bank_transfer();
        let now = Utc::now();
        assert_eq!(t.claim_next_strategy(now), Some(ProviderCode::new("p1")));
        t.gateway_reference = Some("ref-1".into());
        assert_eq!(t.claim_next_strategy(now), Some(ProviderCode::new("p2")));
        assert!(t.gateway_reference.is_none());
        assert_eq!(t.claim_next_strategy(now), Some(ProviderCode::new("p3")));
        assert!(t.strategies_exhausted());
        assert_eq!(t.claim_next_strategy(now), None);
        assert_eq!(t.gateway_provider, Some(ProviderCode::new("p3")));
    }

    #[test]
    fn test_in_flight_provider() {
        let mut t = bank_transfer();
        assert!(t.in_flight_provider().is_none());
        let now = Utc::now();
        t.claim_next_strategy(now);
        assert_eq!(t.in_flight_provider(), Some(&ProviderCode::new("p1")));
        t.record_gateway_history(
            ProviderCode::new("p1"),
            None,
            ProviderStatus::Failed,
            Some("timeout".into()),
            now,
        );
        assert!(t.in_flight_provider().is_none());
    }

    #[test]
    fn test_history_skips_repeats() {
        let mut t = bank_transfer();
        let now = Utc::now();
        for _ in 0..2 {
            t.record_gateway_history(
                ProviderCode::new("p1"),
                Some("r1".into()),
                ProviderStatus::Pending,
                None,
                now,
            );
        }
        assert_eq!(t.gateway_histories.len(), 1);
        t.record_gateway_history(
            ProviderCode::new("p1"),
            Some("r1".into()),
            ProviderStatus::Failed,
            None,
            now,
        );
        assert_eq!(t.gateway_histories.len(), 2);
    }

    #[test]
    fn test_fee_payer_follows_direction() {
        let mut t = bank_transfer();
        t.source_balance_id = Some(BalanceId::new("src"));
        t.destination_balance_id = Some(BalanceId::new("dst"));
        assert_eq!(t.fee_payer(), Some(&BalanceId::new("src")));
        t.transaction_type = TransactionType::Topup;
        assert_eq!(t.fee_payer(), Some(&BalanceId::new("dst")));
    }
}
