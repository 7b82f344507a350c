//! Shared fixtures for in-crate tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::actor::{
    ActorKind, ActorSnapshot, CorporateActor, Credential, PartyType, StaticPinVerifier, UserActor,
};
use crate::bulk::types::{BulkInquiry, BulkStatus, BulkTransfer};
use crate::commit::{CommitProtocol, RetryPolicy};
use crate::core_types::{
    ActorId, Amount, BalanceId, BulkId, CorporateId, ProviderCode, TransactionCode,
};
use crate::error::LedgerError;
use crate::ledger::{Balance, Statement, StatementLedger, StatementType};
use crate::notify::Notifier;
use crate::store::LedgerStore;
use crate::store::memory::MemoryStore;
use crate::transaction::{
    BankDestination, GatewayStrategy, Transaction, TransactionMethod, TransactionStatus,
    TransactionType,
};

pub const CORPORATE: &str = "c1";
pub const PIN: &str = "123456";

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: Some(20),
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        commit_ack_attempts: 3,
    }
}

/// Create a user-owned balance in corporate `c1`, funded through a seed
/// deposit statement so the statement trail stays complete.
pub async fn open_balance(store: &MemoryStore, id: &str, amount: Amount) -> Balance {
    open_owned_balance(store, id, ActorKind::User, id, "IDR", amount).await
}

pub async fn open_owned_balance(
    store: &MemoryStore,
    id: &str,
    owner_type: ActorKind,
    owner: &str,
    currency: &str,
    amount: Amount,
) -> Balance {
    let balance = Balance::open(
        BalanceId::new(id),
        CorporateId::new(CORPORATE),
        owner_type,
        ActorId::new(owner),
        format!("Balance {}", id),
        currency,
    );
    store.create_balance(&balance).await.unwrap();
    if amount > 0 {
        let mut tx = store.begin().await.unwrap();
        StatementLedger::deposit(
            tx.as_mut(),
            &balance.id,
            amount,
            &TransactionCode::new(format!("SEED-{}", id)),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }
    store.balance(&balance.id).await.unwrap().unwrap()
}

pub fn sample_transaction() -> Transaction {
    let party = ActorSnapshot::new(PartyType::User, CORPORATE, "Budi", "a");
    let mut t = Transaction::new(
        TransactionType::TransferToWallet,
        TransactionMethod::Balance,
        CorporateId::new(CORPORATE),
        party.clone(),
        party,
        "IDR",
        format!("ext-{}", ulid::Ulid::new()),
    );
    t.source_balance_id = Some(BalanceId::new("a"));
    t.destination_balance_id = Some(BalanceId::new("b"));
    t
}

/// Unexecuted batch without lines
pub fn sample_bulk_transfer() -> BulkTransfer {
    let now = chrono::Utc::now();
    BulkTransfer {
        id: BulkId::generate(),
        corporate_id: CorporateId::new(CORPORATE),
        owner_id: ActorId::new("op"),
        balance_id: BalanceId::new("a"),
        reference: "payroll".into(),
        total_count: 0,
        total_amount: 0,
        status: BulkStatus::Unexecuted,
        items: Vec::new(),
        failed_numbers: Vec::new(),
        executed_by: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

/// Commit a pending bank transfer the way the use case does: sub-amount
/// withdraw plus a fee pair into `fee_balance`.
pub async fn seed_bank_transfer(
    protocol: &CommitProtocol,
    source: &str,
    fee_balance: &str,
    sub_amount: Amount,
    fee: Amount,
    strategies: Vec<GatewayStrategy>,
) -> Transaction {
    let party = ActorSnapshot::new(PartyType::User, CORPORATE, "Budi", source);
    let bank = ActorSnapshot::new(PartyType::Bank, "451", "Budi", "123");
    let mut t = Transaction::new(
        TransactionType::TransferToBank,
        TransactionMethod::Bank,
        CorporateId::new(CORPORATE),
        party,
        bank,
        "IDR",
        format!("ext-{}", ulid::Ulid::new()),
    );
    t.status = TransactionStatus::Pending;
    t.source_balance_id = Some(BalanceId::new(source));
    t.sub_amount = sub_amount;
    t.total_fee = fee;
    t.amount = sub_amount + fee;
    t.description = "Transfer to bank".into();
    t.bank_destination = Some(BankDestination {
        bank_code: "451".into(),
        account_number: "123".into(),
        account_name: "Budi".into(),
    });
    t.gateway_strategies = strategies;

    let mut statements = vec![Statement::withdraw(
        BalanceId::new(source),
        sub_amount,
        t.code.clone(),
        "Transfer to bank",
        StatementType::Transaction,
        t.created_at,
    )];
    if fee > 0 {
        statements.extend(Statement::transfer_pair(
            BalanceId::new(source),
            BalanceId::new(fee_balance),
            fee,
            t.code.clone(),
            "Fee transfer_to_bank",
            StatementType::Fee,
            t.created_at,
        ));
    }
    protocol.commit(statements, t.clone()).await.unwrap();
    t
}

pub fn user(id: &str) -> UserActor {
    UserActor {
        id: ActorId::new(id),
        corporate_id: CorporateId::new(CORPORATE),
        name: format!("User {}", id),
        verified: true,
        granted_balances: vec![],
    }
}

pub fn operator(id: &str) -> CorporateActor {
    CorporateActor {
        id: ActorId::new(id),
        corporate_id: CorporateId::new(CORPORATE),
        name: format!("Operator {}", id),
        verified: true,
        full_access: true,
        granted_balances: vec![],
    }
}

pub fn pin() -> Credential {
    Credential::Pin(PIN.into())
}

pub fn verifier() -> StaticPinVerifier {
    StaticPinVerifier::new(PIN)
}

/// Collects notifications for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    pub transactions: Mutex<Vec<(TransactionCode, TransactionStatus)>>,
    pub bulk_transfers: Mutex<Vec<BulkTransfer>>,
    pub bulk_inquiries: Mutex<Vec<BulkInquiry>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn transaction_settled(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        self.transactions
            .lock()
            .push((transaction.code.clone(), transaction.status));
        Ok(())
    }

    async fn bulk_transfer_completed(&self, bulk: &BulkTransfer) -> Result<(), LedgerError> {
        self.bulk_transfers.lock().push(bulk.clone());
        Ok(())
    }

    async fn bulk_inquiry_completed(&self, bulk: &BulkInquiry) -> Result<(), LedgerError> {
        self.bulk_inquiries.lock().push(bulk.clone());
        Ok(())
    }
}

pub fn strategies(codes: &[&str]) -> Vec<GatewayStrategy> {
    codes
        .iter()
        .map(|c| GatewayStrategy::new(ProviderCode::new(*c)))
        .collect()
}
