//! Consent commands.

use super::{format_time, print_confirmed, GlobalArgs};
use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use steward_core::{Address, Hash, Purpose};
use steward_ledger::sign_consent_terms;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct ConsentArgs {
    #[command(subcommand)]
    command: ConsentCommand,
}

#[derive(Clone, Copy, ValueEnum)]
enum PurposeArg {
    Research,
    Medical,
    Commercial,
    Personal,
}

impl From<PurposeArg> for Purpose {
    fn from(arg: PurposeArg) -> Self {
        match arg {
            PurposeArg::Research => Purpose::Research,
            PurposeArg::Medical => Purpose::Medical,
            PurposeArg::Commercial => Purpose::Commercial,
            PurposeArg::Personal => Purpose::Personal,
        }
    }
}

#[derive(Subcommand)]
enum ConsentCommand {
    /// Grant a researcher access to data
    Grant {
        /// Researcher address (hex format)
        researcher: String,

        /// Content identifier of the data
        data: String,

        #[arg(short, long, value_enum, default_value = "research")]
        purpose: PurposeArg,

        /// How long the grant lasts
        #[arg(short, long, default_value = "30")]
        days: u64,
    },
    /// Check whether a grant is currently active
    Verify {
        /// Data subject address (hex format)
        subject: String,

        /// Researcher address (hex format)
        researcher: String,

        /// Content identifier of the data
        data: String,
    },
    /// Revoke a grant
    Revoke {
        /// Consent id returned by grant
        consent_id: String,
    },
    /// List grants issued by a subject (default: the configured key)
    List { subject: Option<String> },
}

pub async fn run(global: &GlobalArgs, args: ConsentArgs, cancel: &CancellationToken) -> Result<()> {
    let session = global.session(cancel).await?;
    let consent = &session.consent;

    match args.command {
        ConsentCommand::Grant {
            researcher,
            data,
            purpose,
            days,
        } => {
            let researcher = parse_address(&researcher)?;
            let purpose = Purpose::from(purpose);
            let credential = global.ledger_config()?.credential()?;
            let signature = sign_consent_terms(&credential, &researcher, &data, purpose, days);

            let granted = consent
                .grant(researcher, &data, purpose, days, signature, cancel)
                .await?;
            print_confirmed("Consent granted", &granted.tx_hash);
            println!("    Consent ID: {}", granted.consent_id.to_string().bright_yellow());
        }
        ConsentCommand::Verify {
            subject,
            researcher,
            data,
        } => {
            let subject = parse_address(&subject)?;
            let researcher = parse_address(&researcher)?;
            if consent.verify(subject, researcher, &data).await? {
                println!("{}  Consent is active", "✓".green().bold());
            } else {
                println!("{}  No active consent", "✗".red().bold());
            }
        }
        ConsentCommand::Revoke { consent_id } => {
            let consent_id = parse_hash(&consent_id)?;
            let tx_hash = consent.revoke(consent_id, cancel).await?;
            print_confirmed("Consent revoked", &tx_hash);
        }
        ConsentCommand::List { subject } => {
            let subject = match subject {
                Some(s) => parse_address(&s)?,
                None => session.identity().address,
            };
            let grants = consent.consents_of(subject).await?;
            if grants.is_empty() {
                println!("{}", "No consents".bright_black());
                return Ok(());
            }

            println!("{}", "Consents:".bold().cyan());
            for grant in grants {
                let state = if grant.revoked {
                    "revoked".red()
                } else {
                    "issued".green()
                };
                println!();
                println!("  ID:         {}", grant.id.to_string().bright_yellow());
                println!("  Researcher: {}", grant.researcher);
                println!("  Data:       {}", grant.data_cid);
                println!("  Purpose:    {:?}", grant.purpose);
                println!("  Granted:    {}", format_time(grant.granted_at));
                println!("  Expires:    {}", format_time(grant.expires_at));
                println!("  State:      {}", state);
            }
        }
    }
    Ok(())
}

pub(crate) fn parse_address(s: &str) -> Result<Address> {
    Address::from_hex(s).with_context(|| format!("Invalid address format: {}", s))
}

pub(crate) fn parse_hash(s: &str) -> Result<Hash> {
    s.parse::<Hash>()
        .with_context(|| format!("Invalid hash: {}", s))
}
