//! CLI commands module.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use steward_core::Hash;
use steward_ledger::{contract_addresses, LedgerConfig, LedgerSession, OrchestratorConfig};
use steward_store::{ContentKey, ContentStore, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod consent;
mod data;
mod identity;
mod recovery;
mod store;

/// Settings shared by every command; each one can come from the environment.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Ledger node RPC endpoint
    #[arg(long, global = true, env = "LEDGER_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Hex ed25519 signing key
    #[arg(long, global = true, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// ConsentManager contract address
    #[arg(long, global = true, env = "CONSENT_MANAGER_ADDR")]
    consent_manager: Option<String>,

    /// DataRegistry contract address
    #[arg(long, global = true, env = "NEURO_REGISTRY_ADDR")]
    data_registry: Option<String>,

    /// KeyRecovery contract address
    #[arg(long, global = true, env = "KEY_RECOVERY_ADDR")]
    key_recovery: Option<String>,

    /// Content store repository (default ~/.steward/store)
    #[arg(long, global = true, env = "STORE_REPO_PATH")]
    repo: Option<PathBuf>,

    /// Addresses the store serves blocks on
    #[arg(
        long,
        global = true,
        env = "STORE_LISTEN_ADDRS",
        value_delimiter = ',',
        default_value = "/ip4/127.0.0.1/tcp/4001"
    )]
    listen: Vec<String>,

    /// HTTP gateway addresses (reported only)
    #[arg(
        long,
        global = true,
        env = "STORE_GATEWAY_ADDRS",
        value_delimiter = ',',
        default_value = "/ip4/127.0.0.1/tcp/8080"
    )]
    gateway: Vec<String>,

    /// Pin content added or imported
    #[arg(long, global = true, env = "STORE_ENABLE_PINNING", default_value_t = true, action = ArgAction::Set)]
    enable_pinning: bool,

    /// Blocks required before a transaction counts as final
    #[arg(long, global = true, env = "TX_CONFIRMATIONS", default_value_t = 1)]
    confirmations: u64,

    /// Bound on waiting for a transaction to become final
    #[arg(long, global = true, env = "TX_TIMEOUT_SECS", default_value_t = 120)]
    tx_timeout_secs: u64,

    /// Delay between receipt polls
    #[arg(long, global = true, env = "TX_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Hex AES-256 key for sealing payloads at rest
    #[arg(long, global = true, env = "STORE_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,
}

impl GlobalArgs {
    fn repo_path(&self) -> Result<PathBuf> {
        match &self.repo {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs::home_dir().context("cannot determine home directory")?;
                Ok(home.join(".steward").join("store"))
            }
        }
    }

    pub fn store_config(&self) -> Result<StoreConfig> {
        Ok(StoreConfig {
            enable_pinning: self.enable_pinning,
            ..StoreConfig::at(self.repo_path()?)
        })
    }

    pub fn open_store(&self) -> Result<ContentStore> {
        let config = self.store_config()?;
        let repo = config.repo_path.clone();
        ContentStore::open(config)
            .with_context(|| format!("Failed to open content store at {:?}", repo))
    }

    /// The configured sealing key; required by every encrypting command.
    pub fn encryption_key(&self) -> Result<ContentKey> {
        let Some(hex_key) = self.encryption_key.as_deref() else {
            bail!("No encryption key: set --encryption-key or STORE_ENCRYPTION_KEY");
        };
        let hex_key = hex_key.trim();
        let bytes = hex::decode(hex_key.strip_prefix("0x").unwrap_or(hex_key))
            .context("Invalid encryption key: not hex")?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("Invalid encryption key: expected 32 bytes, got {}", b.len()))?;
        Ok(ContentKey::new(bytes))
    }

    pub fn ledger_config(&self) -> Result<LedgerConfig> {
        let contracts = contract_addresses(
            self.consent_manager.as_deref(),
            self.data_registry.as_deref(),
            self.key_recovery.as_deref(),
        )?;
        Ok(LedgerConfig {
            rpc_url: self.rpc_url.clone(),
            private_key: self.private_key.clone(),
            contracts,
            orchestrator: OrchestratorConfig {
                confirmations: self.confirmations,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                inclusion_timeout: Duration::from_secs(self.tx_timeout_secs),
            },
            ..LedgerConfig::default()
        })
    }

    pub async fn session(&self, cancel: &CancellationToken) -> Result<LedgerSession> {
        let config = self.ledger_config()?;
        debug!(rpc_url = %config.rpc_url, "Opening ledger session");
        LedgerSession::from_config(&config, cancel)
            .await
            .with_context(|| format!("Failed to connect to ledger at {}", config.rpc_url))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Content store operations
    Store(store::StoreArgs),
    /// Consent grants
    Consent(consent::ConsentArgs),
    /// Data registration and integrity checks
    Data(data::DataArgs),
    /// Guardian-based key recovery
    Recovery(recovery::RecoveryArgs),
    /// Show the ledger identity of the configured key
    Identity,
}

pub async fn run(global: GlobalArgs, cmd: Commands) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match cmd {
        Commands::Store(args) => store::run(&global, args, &cancel).await,
        Commands::Consent(args) => consent::run(&global, args, &cancel).await,
        Commands::Data(args) => data::run(&global, args, &cancel).await,
        Commands::Recovery(args) => recovery::run(&global, args, &cancel).await,
        Commands::Identity => identity::run(&global, &cancel).await,
    }
}

/// Print the confirmation line for a final transaction.
pub(crate) fn print_confirmed(what: &str, tx_hash: &Hash) {
    println!("{}  {}", "✓".green().bold(), what);
    println!("    Tx: {}", tx_hash.to_string().bright_yellow());
}

/// Render a unix timestamp as UTC.
pub(crate) fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
