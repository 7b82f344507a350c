//! Provider failover through the public wallet API.

use std::sync::Arc;
use std::time::Duration;

use wallet_ledger::actor::{ActorKind, Credential, StaticPinVerifier, UserActor};
use wallet_ledger::config::AppConfig;
use wallet_ledger::fee::{FeeEntry, FeeRule, FeeSchedule, StaticFeeSchedules};
use wallet_ledger::gateway::sandbox::{SandboxGateway, SandboxOutcome};
use wallet_ledger::gateway::{CallbackOutcome, GatewayRegistry};
use wallet_ledger::notify::LogNotifier;
use wallet_ledger::store::memory::MemoryStore;
use wallet_ledger::tasks::TaskRunner;
use wallet_ledger::usecase::{TopupRequest, TransferBankRequest};
use wallet_ledger::{
    ActorId, Balance, BalanceId, CorporateId, ProviderCode, Transaction, TransactionStatus,
    TransactionType, WalletDeps, WalletLedger,
};

const CORPORATE: &str = "acme";
const PIN: &str = "246810";

struct Setup {
    wallet: WalletLedger,
    runner: TaskRunner,
    providers: Vec<Arc<SandboxGateway>>,
}

async fn setup(callback_timeout_secs: Option<u64>) -> Setup {
    let providers: Vec<Arc<SandboxGateway>> = ["xendit", "flip", "oy"]
        .iter()
        .map(|c| Arc::new(SandboxGateway::new(*c)))
        .collect();
    let mut registry = GatewayRegistry::new();
    for p in &providers {
        registry.register(p.clone());
    }

    let mut config = AppConfig::default();
    config.retry.base_backoff_ms = 1;
    config.retry.max_backoff_ms = 4;
    config.tasks.redelivery_delay_ms = 1;
    config.gateway.call_timeout_ms = 50;
    config.gateway.callback_timeout_secs = callback_timeout_secs;
    config.worker.stale_threshold_secs = 0;

    let deps = WalletDeps {
        store: Arc::new(MemoryStore::new()),
        fees: Arc::new(StaticFeeSchedules::new(vec![FeeSchedule {
            corporate_id: CorporateId::new(CORPORATE),
            fee_balance_id: BalanceId::new("fees"),
            entries: vec![FeeEntry {
                transaction_type: TransactionType::TransferToBank,
                actor_kind: ActorKind::User,
                rule: FeeRule::Flat(6_500),
            }],
        }])),
        verifier: Arc::new(StaticPinVerifier::new(PIN)),
        notifier: Arc::new(LogNotifier),
        registry,
    };
    let (wallet, runner) = WalletLedger::new(deps, &config).unwrap();

    for (id, kind, owner) in [
        ("alice", ActorKind::User, "alice"),
        ("fees", ActorKind::Corporate, "treasury"),
    ] {
        wallet
            .open_balance(Balance::open(
                BalanceId::new(id),
                CorporateId::new(CORPORATE),
                kind,
                ActorId::new(owner),
                id,
                "IDR",
            ))
            .await
            .unwrap();
    }
    wallet
        .service()
        .topup(TopupRequest {
            balance_id: BalanceId::new("alice"),
            amount: 500_000,
            external_id: "seed".into(),
            institution: "014".into(),
            account_number: "8808001".into(),
            description: String::new(),
        })
        .await
        .unwrap();

    Setup {
        wallet,
        runner,
        providers,
    }
}

fn alice() -> UserActor {
    UserActor {
        id: ActorId::new("alice"),
        corporate_id: CorporateId::new(CORPORATE),
        name: "Alice".into(),
        verified: true,
        granted_balances: vec![],
    }
}

impl Setup {
    async fn transfer(&mut self, external_id: &str) -> Transaction {
        let t = self
            .wallet
            .service()
            .transfer_bank(
                &alice(),
                TransferBankRequest {
                    source_balance_id: BalanceId::new("alice"),
                    // Not a direct bank: default order xendit, flip, oy
                    bank_code: "451".into(),
                    account_number: "1234567890".into(),
                    account_name: "Budi".into(),
                    amount: 100_000,
                    external_id: external_id.into(),
                    description: String::new(),
                    credential: Credential::Pin(PIN.into()),
                },
            )
            .await
            .unwrap();
        self.runner.run_until_idle().await;
        t
    }

    async fn callback(&mut self, provider: &str, t: &Transaction, status: &str) -> CallbackOutcome {
        let payload = serde_json::json!({
            "reference": format!("{}-{}", provider, t.code),
            "status": status,
        });
        let outcome = self
            .wallet
            .handle_callback(&ProviderCode::new(provider), payload.to_string().as_bytes())
            .await
            .unwrap();
        self.runner.run_until_idle().await;
        outcome
    }

    async fn reload(&self, t: &Transaction) -> Transaction {
        self.wallet.transaction(&t.code).await.unwrap()
    }

    async fn amount(&self, id: &str) -> i64 {
        self.wallet.balance(&BalanceId::new(id)).await.unwrap().amount
    }
}

#[tokio::test]
async fn test_hanging_provider_falls_through_to_next() {
    let mut s = setup(None).await;
    s.providers[0].push_outcome(SandboxOutcome::Hang);

    let t = s.transfer("hang-1").await;
    let current = s.reload(&t).await;
    assert_eq!(current.gateway_provider, Some(ProviderCode::new("flip")));
    assert_eq!(s.providers[0].call_count(), 1);
    assert_eq!(s.providers[1].call_count(), 1);

    assert_eq!(s.callback("flip", &t, "SUCCESS").await, CallbackOutcome::Completed);
    assert_eq!(s.reload(&t).await.status, TransactionStatus::Completed);
    assert_eq!(s.amount("alice").await, 500_000 - 106_500);
}

#[tokio::test]
async fn test_refund_after_completion_reenters_failover() {
    let mut s = setup(None).await;
    let t = s.transfer("refund-1").await;

    assert_eq!(s.callback("xendit", &t, "SUCCESS").await, CallbackOutcome::Completed);
    assert_eq!(s.callback("xendit", &t, "REFUND").await, CallbackOutcome::Redispatched);

    let current = s.reload(&t).await;
    assert_eq!(current.status, TransactionStatus::Pending);
    assert_eq!(current.gateway_provider, Some(ProviderCode::new("flip")));
    assert_eq!(s.providers[1].calls(), vec![t.code.clone()]);
    // Funds stay reserved while the next provider works
    assert_eq!(s.amount("alice").await, 500_000 - 106_500);
}

#[tokio::test]
async fn test_every_provider_rejecting_restores_balance() {
    let mut s = setup(None).await;
    for p in &s.providers {
        p.set_default(SandboxOutcome::Reject("insufficient float".into()));
    }

    let t = s.transfer("reject-all").await;
    let failed = s.reload(&t).await;
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.gateway_histories.len(), 3);
    assert!(failed.compensated_at.is_some());
    assert_eq!(s.amount("alice").await, 500_000);
    assert_eq!(s.amount("fees").await, 0);
}

#[tokio::test]
async fn test_recovery_worker_expires_silent_provider() {
    let mut s = setup(Some(0)).await;
    let t = s.transfer("silent-1").await;
    assert_eq!(s.providers[0].call_count(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = s.wallet.recovery_worker().scan_and_recover().await.unwrap();
    assert_eq!(report.expired, 1);
    s.runner.run_until_idle().await;

    let current = s.reload(&t).await;
    assert_eq!(current.gateway_provider, Some(ProviderCode::new("flip")));
    assert_eq!(s.providers[1].calls(), vec![t.code.clone()]);

    // The late callback of the expired attempt is ignored
    assert_eq!(s.callback("xendit", &t, "SUCCESS").await, CallbackOutcome::Ignored);
    assert_eq!(s.reload(&t).await.status, TransactionStatus::Pending);
}
