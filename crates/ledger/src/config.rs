//! Ledger client configuration.

use crate::error::{LedgerError, Result};
use std::time::Duration;
use steward_core::{Address, ContractAddresses, Keypair};

/// How long and how deep the orchestrator waits for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Blocks on top of (and including) the inclusion block before a
    /// transaction counts as final. Values below 1 are treated as 1.
    pub confirmations: u64,
    /// Delay between receipt polls.
    pub poll_interval: Duration,
    /// Bound on the whole wait, from broadcast to finality.
    pub inclusion_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn confirmations(&self) -> u64 {
        self.confirmations.max(1)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            poll_interval: Duration::from_millis(1000),
            inclusion_timeout: Duration::from_secs(120),
        }
    }
}

/// Everything needed to open a ledger session with one signing credential.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Hex ed25519 secret. Required for any ledger operation.
    pub private_key: Option<String>,
    pub contracts: ContractAddresses,
    pub orchestrator: OrchestratorConfig,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl LedgerConfig {
    /// Parse the signing credential. A missing key is fatal.
    pub fn credential(&self) -> Result<Keypair> {
        let key = self
            .private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LedgerError::InvalidCredential("no signing key configured".into()))?;
        Ok(Keypair::from_hex(key)?)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            private_key: None,
            contracts: ContractAddresses::default(),
            orchestrator: OrchestratorConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the contract address set from configured strings.
///
/// Unset or empty entries become the zero address; calls to it fail later
/// with `UnknownContract` rather than at startup.
pub fn contract_addresses(
    consent_manager: Option<&str>,
    data_registry: Option<&str>,
    key_recovery: Option<&str>,
) -> Result<ContractAddresses> {
    let parse = |value: Option<&str>| -> Result<Address> {
        let value = value.unwrap_or_default();
        Address::parse_or_zero(value).map_err(|_| LedgerError::InvalidAddress(value.to_string()))
    };
    Ok(ContractAddresses {
        consent_manager: parse(consent_manager)?,
        data_registry: parse(data_registry)?,
        key_recovery: parse(key_recovery)?,
    })
}
