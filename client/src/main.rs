use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueHint};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use xescrow_client::EscrowClient;
use xescrow_core::interface::load_escrow_data;
use xescrow_core::{
    Address, ConditionEngine, ContractStore, EscrowConfig, EscrowReference, EscrowRequest,
    HashlockProvider, Sha256Hashlock,
};

const DEFAULT_CONFIG_PATH: &str = "./xescrow_config.json";
const DEFAULT_REQUEST_PATH: &str = "./escrow_request.json";
const DEFAULT_STORE_PATH: &str = "./escrow_store.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config: EscrowConfig = load_escrow_data(&cli.config)?;

    let store = Arc::new(ContractStore::load(&cli.store).await?);
    let client = EscrowClient::new(&config, store.clone())?;

    // Persist even when the command failed: a poll may have moved the contract.
    let outcome = run(&client, &config, cli.command).await;
    store.save(&cli.store).await?;
    outcome
}

async fn run(
    client: &EscrowClient,
    config: &EscrowConfig,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Create { request, retry } => {
            let outcome = match retry {
                Some(id) => client.resubmit_escrow(&id).await,
                None => {
                    let request: EscrowRequest = load_escrow_data(&request)?;
                    client.create_escrow(&request).await
                }
            };
            print(&outcome)?;
        }
        Commands::Finish {
            contract,
            owner,
            sequence,
        } => {
            let expected = reference(owner, sequence)?;
            print(&client.finish_escrow(&contract, expected.as_ref()).await)?;
        }
        Commands::Cancel {
            contract,
            reason,
            owner,
            sequence,
        } => {
            let expected = reference(owner, sequence)?;
            print(
                &client
                    .cancel_escrow(&contract, &reason, expected.as_ref())
                    .await,
            )?;
        }
        Commands::Abort { contract, reason } => {
            print(&client.abort_escrow(&contract, &reason).await?)?;
        }
        Commands::Poll { contract } => {
            print(&client.poll_escrow(&contract).await?)?;
        }
        Commands::Status { contract } => {
            print(&client.get_escrow_status(&contract).await?)?;
        }
        Commands::Expire => {
            let expired = client.expire_stale().await;
            tracing::info!(count = expired.len(), "Expiry sweep done");
            print(&expired)?;
        }
        Commands::Condition => condition(config)?,
    }

    Ok(())
}

/// Prints a standalone condition pair; nothing is stored.
fn condition(config: &EscrowConfig) -> anyhow::Result<()> {
    let hashlock: Arc<dyn HashlockProvider> = Arc::new(Sha256Hashlock);
    let engine = ConditionEngine::from_config(config.environment, Some(hashlock))?;
    let bundle = engine.safe_generate()?;
    print(&serde_json::json!({
        "condition": bundle.condition.to_string(),
        "fulfillment": bundle.fulfillment.to_string(),
        "origin": bundle.origin,
    }))
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn reference(
    owner: Option<String>,
    sequence: Option<u32>,
) -> anyhow::Result<Option<EscrowReference>> {
    match (owner, sequence) {
        (Some(owner), Some(sequence)) => Ok(Some(EscrowReference {
            owner: Address::parse(&owner)?,
            sequence,
        })),
        (None, None) => Ok(None),
        _ => anyhow::bail!("--owner and --sequence must be given together"),
    }
}

#[derive(Parser)]
#[command(name = "xescrow-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long,
        value_parser,
        default_value = DEFAULT_CONFIG_PATH,
        value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Where contracts, fulfillments included, are kept between runs.
    #[arg(short, long,
        value_parser,
        default_value = DEFAULT_STORE_PATH,
        value_hint = ValueHint::FilePath)]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a contract and send its EscrowCreate for signing.
    Create {
        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_REQUEST_PATH,
            value_hint = ValueHint::FilePath)]
        request: PathBuf,

        /// Resubmit an existing contract still in `created` instead.
        #[arg(long)]
        retry: Option<Uuid>,
    },
    /// Send the EscrowFinish for signing.
    Finish {
        #[arg(long)]
        contract: Uuid,
        /// Expected escrow owner; checked against the contract.
        #[arg(long, requires = "sequence")]
        owner: Option<String>,
        #[arg(long, requires = "owner")]
        sequence: Option<u32>,
    },
    /// Send the EscrowCancel for signing.
    Cancel {
        #[arg(long)]
        contract: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long, requires = "sequence")]
        owner: Option<String>,
        #[arg(long, requires = "owner")]
        sequence: Option<u32>,
    },
    /// Drop a contract that was never submitted.
    Abort {
        #[arg(long)]
        contract: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Refresh a contract from its outstanding signing request.
    Poll {
        #[arg(long)]
        contract: Uuid,
    },
    Status {
        #[arg(long)]
        contract: Uuid,
    },
    /// Expire live escrows past their finish window.
    Expire,
    /// Print a fresh condition and fulfillment pair.
    Condition,
}
