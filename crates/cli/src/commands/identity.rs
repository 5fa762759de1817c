use super::GlobalArgs;
use anyhow::Result;
use colored::Colorize;
use steward_core::Address;
use tokio_util::sync::CancellationToken;

pub async fn run(global: &GlobalArgs, cancel: &CancellationToken) -> Result<()> {
    let config = global.ledger_config()?;
    let session = global.session(cancel).await?;
    let identity = session.identity();

    println!("{}", "Ledger identity:".bold().cyan());
    println!();
    println!("  Endpoint: {}", config.rpc_url);
    println!("  Chain ID: {}", identity.chain_id.to_string().bright_cyan());
    println!("  Address:  {}", identity.address.to_string().bright_yellow());
    println!();
    println!("{}", "Contracts:".bold().cyan());
    let contracts = &config.contracts;
    for (name, address) in [
        ("ConsentManager", contracts.consent_manager),
        ("DataRegistry", contracts.data_registry),
        ("KeyRecovery", contracts.key_recovery),
    ] {
        println!("  {:<15} {}", name, describe(&address));
    }
    Ok(())
}

fn describe(address: &Address) -> String {
    if address.is_zero() {
        "not configured".bright_black().to_string()
    } else {
        address.to_string()
    }
}
