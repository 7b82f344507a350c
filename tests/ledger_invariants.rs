//! Property-based tests for the statement ledger.
//!
//! Any sequence of topups, deductions and wallet transfers, successful or
//! rejected, must leave every balance non-negative and equal to the sum of
//! its own statements, with money only entering or leaving through topups
//! and deductions.

use proptest::prelude::*;
use std::sync::Arc;

use wallet_ledger::actor::{ActorKind, Credential, StaticPinVerifier, UserActor};
use wallet_ledger::config::AppConfig;
use wallet_ledger::fee::{FeeEntry, FeeRule, FeeSchedule, StaticFeeSchedules};
use wallet_ledger::gateway::GatewayRegistry;
use wallet_ledger::gateway::sandbox::SandboxGateway;
use wallet_ledger::notify::LogNotifier;
use wallet_ledger::store::PageRequest;
use wallet_ledger::store::memory::MemoryStore;
use wallet_ledger::usecase::{DeductRequest, TopupRequest, TransferBalanceRequest};
use wallet_ledger::{
    ActorId, Amount, Balance, BalanceId, CorporateId, LedgerError, TransactionType, WalletDeps,
    WalletLedger,
};

const CORPORATE: &str = "acme";
const PIN: &str = "246810";
const USERS: [&str; 2] = ["alice", "bob"];

#[derive(Debug, Clone)]
enum Op {
    Topup { who: usize, amount: Amount },
    Deduct { who: usize, amount: Amount },
    Transfer { from: usize, amount: Amount },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..2usize, 25_000i64..=200_000).prop_map(|(who, amount)| Op::Topup { who, amount }),
        (0..2usize, 1i64..=150_000).prop_map(|(who, amount)| Op::Deduct { who, amount }),
        (0..2usize, 1i64..=150_000).prop_map(|(from, amount)| Op::Transfer { from, amount }),
    ]
}

fn fee_schedule() -> FeeSchedule {
    FeeSchedule {
        corporate_id: CorporateId::new(CORPORATE),
        fee_balance_id: BalanceId::new("fees"),
        entries: vec![
            FeeEntry {
                transaction_type: TransactionType::Topup,
                actor_kind: ActorKind::User,
                rule: FeeRule::Flat(2_500),
            },
            FeeEntry {
                transaction_type: TransactionType::Deduct,
                actor_kind: ActorKind::User,
                rule: FeeRule::Percentage("0.01".into()),
            },
            FeeEntry {
                transaction_type: TransactionType::TransferToWallet,
                actor_kind: ActorKind::User,
                rule: FeeRule::Flat(500),
            },
        ],
    }
}

fn actor(name: &str) -> UserActor {
    UserActor {
        id: ActorId::new(name),
        corporate_id: CorporateId::new(CORPORATE),
        name: name.to_string(),
        verified: true,
        granted_balances: vec![],
    }
}

async fn wallet() -> WalletLedger {
    let deps = WalletDeps {
        store: Arc::new(MemoryStore::new()),
        fees: Arc::new(StaticFeeSchedules::new(vec![fee_schedule()])),
        verifier: Arc::new(StaticPinVerifier::new(PIN)),
        notifier: Arc::new(LogNotifier),
        // Routing must resolve even though no bank transfer is made here
        registry: GatewayRegistry::new()
            .with(Arc::new(SandboxGateway::new("xendit")))
            .with(Arc::new(SandboxGateway::new("flip")))
            .with(Arc::new(SandboxGateway::new("oy"))),
    };
    let (wallet, _runner) = WalletLedger::new(deps, &AppConfig::default()).unwrap();

    for user in USERS {
        wallet
            .open_balance(Balance::open(
                BalanceId::new(user),
                CorporateId::new(CORPORATE),
                ActorKind::User,
                ActorId::new(user),
                "Main",
                "IDR",
            ))
            .await
            .unwrap();
    }
    wallet
        .open_balance(Balance::open(
            BalanceId::new("fees"),
            CorporateId::new(CORPORATE),
            ActorKind::Corporate,
            ActorId::new("treasury"),
            "Fees",
            "IDR",
        ))
        .await
        .unwrap();
    wallet
}

fn expected_rejection(e: &LedgerError) -> bool {
    matches!(
        e,
        LedgerError::InsufficientBalance { .. }
            | LedgerError::FeeExceedsAmount
            | LedgerError::AmountTooSmall { .. }
            | LedgerError::AmountTooLarge { .. }
    )
}

/// Apply `ops` and return the net money that entered the ledger
async fn apply(wallet: &WalletLedger, ops: &[Op]) -> Amount {
    let mut inflow: Amount = 0;
    for (i, op) in ops.iter().enumerate() {
        let external_id = format!("op-{}", i);
        let result = match op {
            Op::Topup { who, amount } => wallet
                .service()
                .topup(TopupRequest {
                    balance_id: BalanceId::new(USERS[*who]),
                    amount: *amount,
                    external_id,
                    institution: "014".into(),
                    account_number: "8808001".into(),
                    description: String::new(),
                })
                .await
                .map(|t| t.sub_amount),
            Op::Deduct { who, amount } => wallet
                .service()
                .deduct(
                    &actor(USERS[*who]),
                    DeductRequest {
                        balance_id: BalanceId::new(USERS[*who]),
                        amount: *amount,
                        external_id,
                        merchant_name: "Kiosk".into(),
                        description: String::new(),
                        credential: Credential::Pin(PIN.into()),
                    },
                )
                .await
                .map(|t| -t.sub_amount),
            Op::Transfer { from, amount } => wallet
                .service()
                .transfer_balance(
                    &actor(USERS[*from]),
                    TransferBalanceRequest {
                        source_balance_id: BalanceId::new(USERS[*from]),
                        destination_balance_id: BalanceId::new(USERS[1 - *from]),
                        amount: *amount,
                        external_id,
                        description: String::new(),
                        credential: Credential::Pin(PIN.into()),
                    },
                )
                .await
                .map(|_| 0),
        };
        match result {
            Ok(delta) => inflow += delta,
            Err(e) => assert!(expected_rejection(&e), "unexpected error: {e}"),
        }
    }
    inflow
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Each balance equals the sum of its statements and never goes negative.
    #[test]
    fn balance_matches_statement_trail(ops in prop::collection::vec(arb_op(), 1..20)) {
        runtime().block_on(async {
            let wallet = wallet().await;
            apply(&wallet, &ops).await;

            for id in USERS.iter().copied().chain(["fees"]) {
                let id = BalanceId::new(id);
                let balance = wallet.balance(&id).await.unwrap();
                let trail = wallet
                    .statements(&id, PageRequest::new(1, PageRequest::MAX_PER_PAGE))
                    .await
                    .unwrap();
                let sum: Amount = trail.iter().map(|s| s.deposit - s.withdraw).sum();
                assert!(balance.amount >= 0);
                assert_eq!(balance.amount, sum);
                if let Some(newest) = trail.first() {
                    assert_eq!(newest.balance, balance.amount);
                }
                assert!(trail.iter().all(|s| s.balance >= 0));
            }
        });
    }

    /// Money only enters through topups and leaves through deductions.
    #[test]
    fn money_is_conserved(ops in prop::collection::vec(arb_op(), 1..20)) {
        runtime().block_on(async {
            let wallet = wallet().await;
            let inflow = apply(&wallet, &ops).await;

            let mut total: Amount = 0;
            for id in USERS.iter().copied().chain(["fees"]) {
                total += wallet.balance(&BalanceId::new(id)).await.unwrap().amount;
            }
            assert_eq!(total, inflow);
        });
    }
}
