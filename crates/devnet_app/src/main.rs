mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use devnet_wallet::{
    Account, BalanceReconciler, ContractOrchestrator, DeclarePayload, HttpFaucet, JsonRpcProvider,
    OperationReport, ReconcilePolicy, SignOptions, WalletConfig, WalletError, account, logging,
    read_token_balance,
};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = match logging::init_logging() {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {e}");
            None
        }
    };

    let config = match &cli.config {
        Some(path) => WalletConfig::load_from_path(path)?,
        None => WalletConfig::load_or_default()?,
    };
    config.validate()?;

    let ok = run(cli.command, &config).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Account-backed services for the commands that need a signer.
struct Session {
    account: Arc<dyn Account>,
    reconciler: BalanceReconciler,
    orchestrator: ContractOrchestrator,
}

impl Session {
    async fn open(config: &WalletConfig, provider: Arc<JsonRpcProvider>) -> Result<Self> {
        let account = account::connect(config, None)
            .await
            .context("Failed to connect to the signer")?;
        info!(address = %account.address(), "account ready");

        let faucet = Arc::new(HttpFaucet::from_config(config)?);
        let reconciler = BalanceReconciler::new(account.clone(), provider.clone(), faucet, config);
        let orchestrator = ContractOrchestrator::new(account.clone(), provider, config.udc_address);
        Ok(Self {
            account,
            reconciler,
            orchestrator,
        })
    }
}

/// Run one command and print its report. Returns whether it succeeded.
async fn run(command: Command, config: &WalletConfig) -> Result<bool> {
    let provider = Arc::new(JsonRpcProvider::from_config(config)?);

    let ok = match command {
        // A pure chain read: no signer connection.
        Command::Balance { token } => {
            let token = token.unwrap_or(config.fee_token);
            print_report(read_token_balance(provider.as_ref(), token, config.account.address).await)
        }
        Command::Topup(args) => {
            let session = Session::open(config, provider).await?;
            let policy = ReconcilePolicy {
                return_excess: args.return_excess,
            };
            print_report(
                session
                    .reconciler
                    .mint_to_target(args.target, policy)
                    .await
                    .map(balance_json),
            )
        }
        Command::Send(args) => {
            let session = Session::open(config, provider).await?;
            print_report(
                session
                    .reconciler
                    .send_to_account(args.to, args.amount, args.token)
                    .await
                    .map(balance_json),
            )
        }
        Command::Declare(args) => {
            let payload = DeclarePayload {
                contract: read_json(&args.sierra)?,
                casm: read_json(&args.casm)?,
                class_hash: args.class_hash,
                compiled_class_hash: args.compiled_class_hash,
            };
            let session = Session::open(config, provider).await?;
            print_report(session.orchestrator.declare_if_not_already(&payload).await)
        }
        Command::Deploy(args) => {
            let constructor_args: Value = serde_json::from_str(&args.args)
                .context("--args must be a JSON object or array")?;
            let session = Session::open(config, provider).await?;
            print_report(
                session
                    .orchestrator
                    .deploy(args.class_hash, &constructor_args)
                    .await,
            )
        }
        Command::Sign { typed_data } => {
            let typed_data = read_json(&typed_data)?;
            let session = Session::open(config, provider).await?;
            print_report(
                session
                    .account
                    .sign_message(&typed_data, &SignOptions::default())
                    .await,
            )
        }
    };
    Ok(ok)
}

fn balance_json(balance: alloy_primitives::U256) -> Value {
    json!({ "balance": balance.to_string() })
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_report<T: Serialize>(result: Result<T, WalletError>) -> bool {
    if let Err(e) = &result {
        warn!("{}", e.user_message());
    }
    let report = OperationReport::from(result);
    let ok = matches!(report, OperationReport::Result(_));
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to serialize report: {e}"),
    }
    ok
}
