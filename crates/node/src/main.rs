//! steward-node: development ledger behind an HTTP JSON RPC endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use steward_core::{Address, Keypair};
use steward_devnet::{Devnet, DevnetConfig, Mining};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "steward-node")]
#[command(about = "Development ledger hosting the consent, data registry and key recovery contracts", long_about = None)]
#[command(version)]
struct Args {
    /// Address to serve the RPC endpoint on
    #[arg(long, env = "NODE_LISTEN", default_value = "127.0.0.1:8545")]
    listen: SocketAddr,

    /// Chain id reported to clients and required in transactions
    #[arg(long, env = "CHAIN_ID", default_value_t = 1337)]
    chain_id: u64,

    /// Interval for mining blocks on a timer (0 disables the timer)
    #[arg(long, env = "BLOCK_TIME_MS", default_value_t = 1000)]
    block_time_ms: u64,

    /// Guardian approvals a recovery request needs
    #[arg(long, env = "RECOVERY_THRESHOLD", default_value_t = 3)]
    recovery_threshold: u64,

    /// Quoted gas price
    #[arg(long, env = "GAS_PRICE", default_value_t = 1)]
    gas_price: u64,

    /// Hex key of the contract deployer (contract addresses derive from it)
    #[arg(long, env = "DEPLOYER_KEY", hide_env_values = true)]
    deployer_key: Option<String>,

    /// Only mine on the block timer, not on every transaction
    #[arg(long)]
    manual: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let deployer = match &args.deployer_key {
        Some(key) => Keypair::from_hex(key).context("invalid DEPLOYER_KEY")?.address(),
        None => Address::ZERO,
    };
    let devnet = Arc::new(Devnet::new(DevnetConfig {
        chain_id: args.chain_id,
        gas_price: args.gas_price,
        recovery_threshold: args.recovery_threshold,
        mining: if args.manual { Mining::Manual } else { Mining::Instant },
        deployer,
        ..DevnetConfig::default()
    }));

    let addresses = devnet.addresses();
    println!("CONSENT_MANAGER_ADDR={}", addresses.consent_manager);
    println!("NEURO_REGISTRY_ADDR={}", addresses.data_registry);
    println!("KEY_RECOVERY_ADDR={}", addresses.key_recovery);

    let cancel = CancellationToken::new();
    let miner = (args.block_time_ms > 0).then(|| {
        steward_node::spawn_miner(
            devnet.clone(),
            Duration::from_millis(args.block_time_ms),
            cancel.clone(),
        )
    });

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(chain_id = args.chain_id, threshold = args.recovery_threshold, "Ledger node started");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.cancel();
        }
    });

    steward_node::serve(listener, devnet, cancel.clone()).await?;
    cancel.cancel();
    if let Some(miner) = miner {
        miner.await.ok();
    }
    Ok(())
}
