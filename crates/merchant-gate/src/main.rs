use std::process::ExitCode;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use clap::{Parser, Subcommand};
use gate_ledger::{visible_addresses, AdminStore, LedgerError, SqliteAdminStore};
use merchant_gate::{
    evaluator, network, AuthorizationController, AuthorizationReport, GateConfig, GateError,
    GateStatus, RpcWallet, WalletProvider,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "merchant-gate")]
#[command(about = "Check and grant merchant authorization for an Ethereum account")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the authorization report for an account.
    Check {
        /// Account to inspect. Defaults to the CUSTOMER_PRIVATE_KEY account.
        #[arg(long)]
        address: Option<Address>,
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Approve and activate until the merchant reports the account authorized.
    Authorize,
    /// Back-office ledger of hidden addresses and notes.
    Admin {
        #[arg(long, env = "LEDGER_DB_PATH", default_value = "./merchant-gate-ledger.db")]
        db: String,
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Debug, Subcommand)]
enum AdminAction {
    Hide { address: Address },
    Unhide { address: Address },
    /// Set a note; an empty note clears it.
    Note {
        address: Address,
        #[arg(default_value = "")]
        text: String,
    },
    Notes,
    Hidden,
    /// Print the given addresses that are not hidden.
    Visible { addresses: Vec<Address> },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Usage(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Gate(e)) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Admin { db, action } => admin(&db, action),
        Command::Check { address, json } => {
            let config = GateConfig::from_env()?;
            let url = config
                .rpc_url
                .parse()
                .map_err(|e| CliError::Usage(format!("invalid RPC_URL: {e}")))?;

            let report = match address {
                Some(owner) => {
                    let wallet = RpcWallet::new(ProviderBuilder::new().connect_http(url));
                    read_report(&wallet, &config, owner).await?
                }
                None => {
                    let (signer, account) = customer_signer()?;
                    let provider = ProviderBuilder::new()
                        .wallet(EthereumWallet::from(signer))
                        .connect_http(url);
                    let controller = AuthorizationController::new(
                        config,
                        Some(RpcWallet::with_local_account(provider, account)),
                    );
                    match controller.initialize().await? {
                        GateStatus::Locked(report) | GateStatus::Unlocked(report) => report,
                        GateStatus::AwaitingNetworkSwitch => {
                            return Err(CliError::Usage(
                                "RPC endpoint is not on the configured chain".to_string(),
                            ))
                        }
                        GateStatus::Disconnected => {
                            return Err(GateError::NoAccountSelected.into());
                        }
                    }
                }
            };
            print_report(&report, json)
        }
        Command::Authorize => {
            let config = GateConfig::from_env()?;
            let url = config
                .rpc_url
                .parse()
                .map_err(|e| CliError::Usage(format!("invalid RPC_URL: {e}")))?;
            let (signer, account) = customer_signer()?;
            let provider = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url);
            let controller = AuthorizationController::new(
                config,
                Some(RpcWallet::with_local_account(provider, account)),
            );

            let mut states = controller.subscribe();
            let progress = tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    let state = states.borrow_and_update().clone();
                    tracing::info!(?state, "progress");
                }
            });

            let result = controller.authorize().await;
            progress.abort();

            match result? {
                GateStatus::Unlocked(report) => {
                    println!("{report}");
                    Ok(())
                }
                GateStatus::AwaitingNetworkSwitch => Err(CliError::Usage(
                    "RPC endpoint is not on the configured chain".to_string(),
                )),
                GateStatus::Locked(report) => {
                    println!("{report}");
                    Err(GateError::VerificationFailed("account is still locked".to_string()).into())
                }
                GateStatus::Disconnected => Err(GateError::NoAccountSelected.into()),
            }
        }
    }
}

fn customer_signer() -> Result<(PrivateKeySigner, Address), CliError> {
    let key = std::env::var("CUSTOMER_PRIVATE_KEY")
        .map_err(|_| CliError::Usage("CUSTOMER_PRIVATE_KEY environment variable is required".to_string()))?;
    let signer: PrivateKeySigner = key
        .parse()
        .map_err(|_| CliError::Usage("invalid CUSTOMER_PRIVATE_KEY".to_string()))?;
    let account = signer.address();
    Ok((signer, account))
}

async fn read_report<W: WalletProvider>(
    wallet: &W,
    config: &GateConfig,
    owner: Address,
) -> Result<AuthorizationReport, GateError> {
    network::verify_network(wallet, config.chain_id).await?;
    evaluator::evaluate(wallet, config, owner).await
}

fn print_report(report: &AuthorizationReport, json: bool) -> Result<(), CliError> {
    if json {
        let body = serde_json::to_string_pretty(report)
            .map_err(|e| CliError::Usage(format!("failed to encode report: {e}")))?;
        println!("{body}");
    } else {
        println!("{report}");
    }
    Ok(())
}

fn admin(db: &str, action: AdminAction) -> Result<(), CliError> {
    let store = SqliteAdminStore::open(db)?;
    match action {
        AdminAction::Hide { address } => {
            if store.hide(address)? {
                println!("hidden {address}");
            } else {
                println!("{address} was already hidden");
            }
        }
        AdminAction::Unhide { address } => {
            if store.unhide(address)? {
                println!("unhidden {address}");
            } else {
                println!("{address} was not hidden");
            }
        }
        AdminAction::Note { address, text } => {
            store.set_note(address, &text)?;
            match store.note(address)? {
                Some(note) => println!("{address}: {note}"),
                None => println!("cleared note for {address}"),
            }
        }
        AdminAction::Notes => {
            for (address, note) in store.notes()? {
                println!("{address}  {note}");
            }
        }
        AdminAction::Hidden => {
            for address in store.hidden()? {
                println!("{address}");
            }
        }
        AdminAction::Visible { addresses } => {
            for address in visible_addresses(&store, &addresses)? {
                println!("{address}");
            }
        }
    }
    Ok(())
}
