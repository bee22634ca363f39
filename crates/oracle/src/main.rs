//! `oracle`: run the responder, register the provider, or inspect response encoding.
//!
//!   ORACLE_PRIVATE_KEY=0x... WOLFRAM_APP_ID=... oracle run --config oracle.json
//!   oracle register --config oracle.json
//!   oracle encode "Hello, World!"
//!   oracle decode 0x000...48656c6c6f2c20576f726c6421

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oracle::{
    decode, encode, ensure_registered, DispatchSubmitter, Dispatcher, EncodedResponse, LocalSigner,
    OracleConfig, QuerySubscription, RegistrationOutcome, ResolverRegistry, RpcClient,
    SubscriptionConfig, Transactor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How long in-flight dispatches may run after intake stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "oracle", version, about = "Answer Zap Dispatch queries from external data sources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for queries and respond until the subscription fails or Ctrl-C.
    Run {
        #[arg(long, short, default_value = "oracle.json")]
        config: PathBuf,
        /// Register the provider first if it has no title on-chain.
        #[arg(long)]
        register: bool,
    },
    /// Register the provider and its endpoint curves if not yet registered.
    Register {
        #[arg(long, short, default_value = "oracle.json")]
        config: PathBuf,
    },
    /// Print the response words for an answer.
    Encode { answer: String },
    /// Rebuild answer text from response words.
    Decode {
        #[arg(required = true)]
        words: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    match Cli::parse().command {
        Command::Run { config, register } => run(&config, register).await,
        Command::Register { config } => {
            let cfg = OracleConfig::load(&config)?;
            let registry = cfg.build_registry()?;
            let transactor = connect(&cfg).await?;
            register_provider(&cfg, &transactor, &registry).await
        }
        Command::Encode { answer } => {
            for word in encode(&answer).hex_words() {
                println!("0x{}", word);
            }
            Ok(())
        }
        Command::Decode { words } => {
            let response = EncodedResponse::from_hex_words(&words)?;
            println!("{}", decode(&response)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn connect(cfg: &OracleConfig) -> Result<Arc<Transactor>> {
    let rpc = Arc::new(RpcClient::new(cfg.http_url.clone())?);
    let chain_id = match cfg.chain_id {
        Some(id) => id,
        None => rpc.chain_id().await.context("eth_chainId")?,
    };
    let signer = LocalSigner::from_hex(&cfg.private_key()?, chain_id)?;
    tracing::info!(account = %signer.address(), chain_id, "loaded account");
    Ok(Arc::new(Transactor::new(rpc, signer, cfg.gas_limit)))
}

async fn register_provider(
    cfg: &OracleConfig,
    transactor: &Transactor,
    registry: &ResolverRegistry,
) -> Result<()> {
    let outcome = ensure_registered(
        transactor,
        &cfg.registry_address()?,
        &cfg.provider_info()?,
        registry,
    )
    .await?;
    if let RegistrationOutcome::Registered { transactions } = outcome {
        tracing::info!(title = %cfg.provider.title, count = transactions.len(), "created oracle");
    }
    Ok(())
}

async fn run(config_path: &Path, register_first: bool) -> Result<()> {
    let cfg = OracleConfig::load(config_path)?;
    let registry = Arc::new(cfg.build_registry()?);
    let transactor = connect(&cfg).await?;
    if register_first {
        register_provider(&cfg, &transactor, &registry).await?;
    }

    let dispatch_address = cfg.dispatch_address()?;
    let submitter = Arc::new(DispatchSubmitter::new(Arc::clone(&transactor), dispatch_address));
    let dispatcher = Arc::new(Dispatcher::new(registry, submitter, cfg.dispatch_config()));
    let subscription = QuerySubscription::new(SubscriptionConfig {
        ws_url: cfg.ws_url(),
        dispatch_address,
        provider_address: transactor.address(),
    });

    let (tx, rx) = mpsc::channel(cfg.dispatch.channel_capacity.max(1));
    let dispatch_task = tokio::spawn(dispatcher.run(rx));
    // Dropping the subscription future closes `tx`, which ends the dispatcher's intake.
    let result = tokio::select! {
        r = subscription.run(tx) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, dispatch_task).await {
        Ok(joined) => {
            joined.context("dispatcher task")?;
        }
        Err(_) => tracing::warn!("in-flight dispatches still running at shutdown"),
    }
    result.context("query subscription failed")
}
