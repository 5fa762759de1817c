//! Key recovery commands.

use super::consent::{parse_address, parse_hash};
use super::{format_time, print_confirmed, GlobalArgs};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use steward_core::{sha256, Hash, RecoveryPhase};
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct RecoveryArgs {
    #[command(subcommand)]
    command: RecoveryCommand,
}

#[derive(Subcommand)]
enum RecoveryCommand {
    /// Register a guardian for the configured key
    AddGuardian {
        /// Guardian address (hex format)
        guardian: String,

        /// Commitment to the guardian's share (hex sha256)
        #[arg(long, conflicts_with = "share", required_unless_present = "share")]
        commitment: Option<String>,

        /// The guardian's share; its sha256 becomes the commitment
        #[arg(long)]
        share: Option<String>,
    },
    /// Remove a guardian
    RemoveGuardian { guardian: String },
    /// Open a recovery request for a replacement key
    Initiate {
        /// Replacement public key (hex); its sha256 is submitted
        #[arg(long, conflicts_with = "new_key_hash", required_unless_present = "new_key_hash")]
        new_key: Option<String>,

        /// Submit this key hash directly
        #[arg(long)]
        new_key_hash: Option<String>,
    },
    /// Approve a request as the configured guardian key
    Approve {
        request_id: String,

        /// The guardian's share
        #[arg(long)]
        share: String,
    },
    /// Show a request's progress
    Status { request_id: String },
    /// List guardians of an owner (default: the configured key)
    Guardians { owner: Option<String> },
}

pub async fn run(global: &GlobalArgs, args: RecoveryArgs, cancel: &CancellationToken) -> Result<()> {
    let session = global.session(cancel).await?;
    let recovery = &session.recovery;

    match args.command {
        RecoveryCommand::AddGuardian {
            guardian,
            commitment,
            share,
        } => {
            let guardian = parse_address(&guardian)?;
            let commitment = match (commitment, share) {
                (Some(hex), _) => parse_hash(&hex)?,
                (None, Some(share)) => sha256(share.as_bytes()),
                (None, None) => bail!("either --commitment or --share is required"),
            };
            let tx_hash = recovery.add_guardian(guardian, commitment, cancel).await?;
            print_confirmed("Guardian added", &tx_hash);
            println!("    Guardian: {}", guardian.to_string().bright_yellow());
        }
        RecoveryCommand::RemoveGuardian { guardian } => {
            let guardian = parse_address(&guardian)?;
            let tx_hash = recovery.remove_guardian(guardian, cancel).await?;
            print_confirmed("Guardian removed", &tx_hash);
        }
        RecoveryCommand::Initiate {
            new_key,
            new_key_hash,
        } => {
            let new_key_hash = match (new_key, new_key_hash) {
                (Some(key), _) => key_hash(&key)?,
                (None, Some(hex)) => parse_hash(&hex)?,
                (None, None) => bail!("either --new-key or --new-key-hash is required"),
            };
            let initiated = recovery.initiate(new_key_hash, cancel).await?;
            print_confirmed("Recovery initiated", &initiated.tx_hash);
            println!(
                "    Request ID: {}",
                initiated.request_id.to_string().bright_yellow()
            );
        }
        RecoveryCommand::Approve { request_id, share } => {
            let request_id = parse_hash(&request_id)?;
            let approved = recovery
                .approve(request_id, sha256(share.as_bytes()), cancel)
                .await?;
            print_confirmed("Recovery approved", &approved.tx_hash);
            println!(
                "    Approvals: {}/{}",
                approved.status.approvals, approved.status.threshold
            );
            if approved.status.is_actionable() {
                println!("{}", "    Threshold reached".green().bold());
            }
        }
        RecoveryCommand::Status { request_id } => {
            let status = recovery.status(parse_hash(&request_id)?).await?;
            let phase = match status.phase {
                RecoveryPhase::Initiated => "initiated".bright_black(),
                RecoveryPhase::Approving => "approving".yellow(),
                RecoveryPhase::Actionable => "actionable".green(),
            };
            println!("{}", "Recovery request:".bold().cyan());
            println!();
            println!("  ID:        {}", status.request_id.to_string().bright_yellow());
            println!("  Owner:     {}", status.owner);
            println!("  Approvals: {}/{}", status.approvals, status.threshold);
            println!("  Phase:     {}", phase);
        }
        RecoveryCommand::Guardians { owner } => {
            let owner = match owner {
                Some(s) => parse_address(&s)?,
                None => session.identity().address,
            };
            let guardians = recovery.guardians(owner).await?;
            if guardians.is_empty() {
                println!("{}", "No guardians".bright_black());
            } else {
                println!("{}", "Guardians:".bold().cyan());
                println!();
                for guardian in guardians {
                    println!(
                        "  {}  added {}",
                        guardian.address.to_string().bright_yellow(),
                        format_time(guardian.added_at)
                    );
                }
            }

            if let Some(request) = recovery.open_request(owner).await? {
                println!();
                println!(
                    "  Open request {} ({} approvals, since {})",
                    request.id.to_string().bright_yellow(),
                    request.approvals.len(),
                    format_time(request.initiated_at)
                );
            }
        }
    }
    Ok(())
}

/// Hash a hex public key the way recovery requests commit to it.
fn key_hash(hex_key: &str) -> Result<Hash> {
    let hex_key = hex_key.trim();
    let bytes = hex::decode(hex_key.strip_prefix("0x").unwrap_or(hex_key))
        .with_context(|| format!("Invalid public key: {}", hex_key))?;
    if bytes.len() != 32 {
        bail!("Invalid public key: expected 32 bytes, got {}", bytes.len());
    }
    Ok(sha256(&bytes))
}
