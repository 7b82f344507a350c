//! Wallet Ledger - service entry point
//!
//! Two run modes:
//!
//! ```text
//! worker   store (memory | postgres) + HTTP providers
//!          -> task runner + recovery worker, until killed
//! sandbox  memory store + in-process providers
//!          -> one topup and one bank transfer end to end, then exit
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use wallet_ledger::actor::{
    ActorKind, CorporateActor, Credential, DenyAllVerifier, StaticPinVerifier, UserActor,
};
use wallet_ledger::config::{AppConfig, StoreKind};
use wallet_ledger::fee::StaticFeeSchedules;
use wallet_ledger::gateway::{GatewayRegistry, PaymentGateway};
use wallet_ledger::gateway::sandbox::SandboxGateway;
use wallet_ledger::notify::LogNotifier;
use wallet_ledger::store::LedgerStore;
use wallet_ledger::store::memory::MemoryStore;
use wallet_ledger::store::postgres::PgLedgerStore;
use wallet_ledger::usecase::{TopupRequest, TransferBankRequest};
use wallet_ledger::{ActorId, Balance, BalanceId, CorporateId, WalletDeps, WalletLedger};

#[derive(Parser, Debug)]
#[command(name = "wallet_ledger")]
#[command(about = "Multi-tenant wallet ledger and disbursement engine", long_about = None)]
struct Cli {
    /// Loads config/<env>.yaml unless --config is given
    #[arg(short, long, env = "WALLET_LEDGER_ENV", default_value = "dev")]
    env: String,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive follow-up tasks and the recovery scan
    Worker,
    /// Run a topup and a bank transfer against in-process providers
    Sandbox {
        /// Corporate the demo balances belong to. Must have a fee schedule.
        #[arg(long, default_value = "demo")]
        corporate: String,
        #[arg(long, default_value = "123456")]
        pin: String,
        #[arg(long, default_value_t = 250_000)]
        amount: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(&cli.env),
    }
    .context("loading configuration")?;
    let _log_guard = wallet_ledger::logging::init_logging(&config);

    info!(env = %cli.env, "Starting wallet ledger");

    match cli.command {
        Command::Worker => run_worker(config).await,
        Command::Sandbox {
            corporate,
            pin,
            amount,
        } => run_sandbox(config, CorporateId::new(corporate), pin, amount).await,
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.store.kind {
        StoreKind::Memory => {
            info!("Using in-memory ledger store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let url = config
                .store
                .postgres_url
                .as_deref()
                .context("store.postgres_url is not set")?;
            let store = PgLedgerStore::connect(url, config.store.max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            store.init_schema().await.context("initializing schema")?;
            Ok(Arc::new(store))
        }
    }
}

async fn run_worker(config: AppConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let registry = GatewayRegistry::from_endpoints(&config.gateway.providers)
        .context("building provider clients")?;

    // Credentials are checked by the API layer in front of this process
    let deps = WalletDeps {
        store,
        fees: Arc::new(StaticFeeSchedules::new(config.fee_schedules.clone())),
        verifier: Arc::new(DenyAllVerifier),
        notifier: Arc::new(LogNotifier),
        registry,
    };
    let (wallet, runner) = WalletLedger::new(deps, &config)?;

    let worker = wallet.recovery_worker();
    let runner_handle = tokio::spawn(runner.run());
    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });

    info!("Worker running, Ctrl-C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        result = runner_handle => error!(?result, "Task runner stopped"),
        result = worker_handle => error!(?result, "Recovery worker stopped"),
    }
    Ok(())
}

async fn run_sandbox(
    config: AppConfig,
    corporate: CorporateId,
    pin: String,
    amount: i64,
) -> Result<()> {
    let schedule = config
        .fee_schedules
        .iter()
        .find(|s| s.corporate_id == corporate)
        .cloned()
        .with_context(|| format!("no fee schedule for corporate {}", corporate))?;

    let routing = &config.gateway.routing;
    let mut registry = GatewayRegistry::new();
    let mut providers: Vec<Arc<SandboxGateway>> = Vec::new();
    for code in routing
        .ewallet_order
        .iter()
        .chain(&routing.direct_bank_order)
        .chain(&routing.default_order)
    {
        if !registry.contains(code) {
            let gateway = Arc::new(SandboxGateway::new(code.clone()));
            registry.register(gateway.clone());
            providers.push(gateway);
        }
    }

    let deps = WalletDeps {
        store: Arc::new(MemoryStore::new()),
        fees: Arc::new(StaticFeeSchedules::new(config.fee_schedules.clone())),
        verifier: Arc::new(StaticPinVerifier::new(pin.clone())),
        notifier: Arc::new(LogNotifier),
        registry,
    };
    let (wallet, mut runner) = WalletLedger::new(deps, &config)?;

    let user = UserActor {
        id: ActorId::new("sandbox-user"),
        corporate_id: corporate.clone(),
        name: "Sandbox User".into(),
        verified: true,
        granted_balances: vec![],
    };
    let treasury = CorporateActor {
        id: ActorId::new("sandbox-treasury"),
        corporate_id: corporate.clone(),
        name: "Sandbox Treasury".into(),
        verified: true,
        full_access: true,
        granted_balances: vec![],
    };
    let wallet_id = BalanceId::new("sandbox-wallet");
    wallet
        .open_balance(Balance::open(
            wallet_id.clone(),
            corporate.clone(),
            ActorKind::User,
            user.id.clone(),
            "Main",
            "IDR",
        ))
        .await?;
    wallet
        .open_balance(Balance::open(
            schedule.fee_balance_id.clone(),
            corporate.clone(),
            ActorKind::Corporate,
            treasury.id.clone(),
            "Fees",
            "IDR",
        ))
        .await?;

    let topup = wallet
        .service()
        .topup(TopupRequest {
            balance_id: wallet_id.clone(),
            amount: amount * 2,
            external_id: format!("sandbox-topup-{}", ulid::Ulid::new()),
            institution: "014".into(),
            account_number: "8808001".into(),
            description: "Sandbox topup".into(),
        })
        .await?;
    println!("topup     {} {} fee={}", topup.code, topup.status, topup.total_fee);

    let transfer = wallet
        .service()
        .transfer_bank(
            &user,
            TransferBankRequest {
                source_balance_id: wallet_id.clone(),
                bank_code: "002".into(),
                account_number: "1234567890".into(),
                account_name: "Sandbox Payee".into(),
                amount,
                external_id: format!("sandbox-transfer-{}", ulid::Ulid::new()),
                description: "Sandbox disbursement".into(),
                credential: Credential::Pin(pin),
            },
        )
        .await?;
    println!("transfer  {} {}", transfer.code, transfer.status);

    runner.run_until_idle().await;

    let dispatched = wallet.transaction(&transfer.code).await?;
    let (provider, reference) = match (&dispatched.gateway_provider, &dispatched.gateway_reference)
    {
        (Some(provider), Some(reference)) => (provider.clone(), reference.clone()),
        _ => anyhow::bail!("transfer {} was not dispatched", transfer.code),
    };
    println!("dispatch  {} via {} ref={}", transfer.code, provider, reference);

    let payload = serde_json::json!({ "reference": reference, "status": "SUCCESS" });
    let outcome = wallet
        .handle_callback(&provider, payload.to_string().as_bytes())
        .await?;
    println!("callback  {:?}", outcome);

    runner.run_until_idle().await;

    let settled = wallet.transaction(&transfer.code).await?;
    let balance = wallet.balance(&wallet_id).await?;
    let fees = wallet.balance(&schedule.fee_balance_id).await?;
    println!("settled   {} {}", settled.code, settled.status);
    println!("balance   {} = {}", balance.id, balance.amount);
    println!("fees      {} = {}", fees.id, fees.amount);
    for provider in &providers {
        println!("provider  {} calls={}", provider.code(), provider.call_count());
    }
    Ok(())
}
