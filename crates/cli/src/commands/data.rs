//! Data provenance commands.

use super::store::parse_cid;
use super::{format_time, print_confirmed, GlobalArgs};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use steward_core::{sha256, DataMetadata, Hash};
use steward_ledger::Registration;
use steward_store::ENCRYPTION_ALGORITHM;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct DataArgs {
    #[command(subcommand)]
    command: DataCommand,
}

#[derive(Args)]
struct MetadataArgs {
    /// Recording session identifier
    #[arg(long, default_value = "")]
    session_id: String,

    /// Samples per second
    #[arg(long, default_value = "256")]
    sample_rate: u64,

    #[arg(long, default_value = "4")]
    channels: u64,

    /// Recording length in seconds
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Sample encoding
    #[arg(long, default_value = "float32")]
    format: String,
}

impl From<MetadataArgs> for DataMetadata {
    fn from(args: MetadataArgs) -> Self {
        DataMetadata {
            session_id: args.session_id,
            sample_rate: args.sample_rate,
            channel_count: args.channels,
            duration_secs: args.duration,
            format: args.format,
        }
    }
}

#[derive(Subcommand)]
enum DataCommand {
    /// Add a file to the store, then register its identifier and digest
    Register {
        /// File to store and register
        file: PathBuf,

        /// Seal with AES-256-GCM under the configured encryption key before storing
        #[arg(long)]
        encrypt: bool,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Compare content with the digest registered for it
    Verify {
        cid: String,

        /// Hash this file instead of the locally stored content
        #[arg(long, conflicts_with = "hash")]
        file: Option<PathBuf>,

        /// Compare this sha256 digest (hex)
        #[arg(long)]
        hash: Option<String>,
    },
    /// Show the registered record
    Show { cid: String },
}

pub async fn run(global: &GlobalArgs, args: DataArgs, cancel: &CancellationToken) -> Result<()> {
    match args.command {
        DataCommand::Register {
            file,
            encrypt,
            metadata,
        } => {
            let key = encrypt.then(|| global.encryption_key()).transpose()?;

            // Two independent steps: content that is stored but not
            // registered stays valid if the second one fails.
            let store = global.open_store()?;
            let added = match &key {
                Some(key) => store.add_file_encrypted(&file, key),
                None => store.add_file(&file),
            }
            .with_context(|| format!("Failed to add {}", file.display()))?;
            store.flush()?;
            println!("{}  Stored {}", "✓".green().bold(), file.display());
            println!("    CID: {}", added.cid.to_string().bright_yellow());

            let session = global.session(cancel).await?;
            let registration = Registration {
                cid: added.cid.to_string(),
                content_hash: added.digest,
                size: added.size,
                is_encrypted: key.is_some(),
                encryption_algorithm: key
                    .as_ref()
                    .map(|_| ENCRYPTION_ALGORITHM.to_string())
                    .unwrap_or_default(),
                metadata: metadata.into(),
            };
            let registered = session.provenance.register(registration, cancel).await?;
            print_confirmed("Data registered", &registered.tx_hash);
            println!("    Record: {}", registered.record_id.to_string().bright_yellow());
        }
        DataCommand::Verify { cid, file, hash } => {
            let content_hash = match (file, hash) {
                (Some(path), _) => {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    sha256(&bytes)
                }
                (None, Some(hex)) => hex
                    .parse::<Hash>()
                    .with_context(|| format!("Invalid hash: {}", hex))?,
                (None, None) => {
                    let store = global.open_store()?;
                    sha256(&store.get(&parse_cid(&cid)?)?)
                }
            };

            let session = global.session(cancel).await?;
            if session.provenance.verify_integrity(&cid, content_hash).await? {
                println!("{}  Integrity verified", "✓".green().bold());
            } else {
                println!("{}  Digest does not match the registered record", "✗".red().bold());
            }
            println!("    SHA256: {}", content_hash.to_string().bright_black());
        }
        DataCommand::Show { cid } => {
            let session = global.session(cancel).await?;
            let record = session.provenance.record(&cid).await?;

            println!("{}", "Data record:".bold().cyan());
            println!();
            println!("  Record:     {}", record.record_id.to_string().bright_yellow());
            println!("  CID:        {}", record.cid);
            println!("  Owner:      {}", record.owner);
            println!("  SHA256:     {}", record.data_hash.to_string().bright_black());
            println!("  Size:       {} bytes", record.size);
            println!("  Registered: {}", format_time(record.created_at));
            if record.is_encrypted {
                println!("  Encrypted:  {}", record.encryption_algorithm.green());
            } else {
                println!("  Encrypted:  {}", "no".bright_black());
            }
            let meta = &record.metadata;
            println!(
                "  Session:    {} ({} Hz, {} ch, {} s, {})",
                meta.session_id, meta.sample_rate, meta.channel_count, meta.duration_secs, meta.format
            );
        }
    }
    Ok(())
}
