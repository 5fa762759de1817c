//! Contract bindings.
//!
//! Workflows see the three contracts only through [`ContractGateway`], a
//! capability set of "submit a call" and "run a query". [`ContractRegistry`]
//! routes both to the configured contract addresses.

use crate::error::{LedgerError, Result};
use crate::orchestrator::{Submission, TransactionOrchestrator};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use steward_core::{decode_output, Address, ContractAddresses, ContractCall, ContractQuery};
use tokio_util::sync::CancellationToken;

/// Write and read access to the contract surface.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    /// Account the writes are signed by.
    fn sender(&self) -> Address;

    /// Submit a state-changing call and wait until it is final.
    async fn submit(&self, call: ContractCall, cancel: &CancellationToken) -> Result<Submission>;

    /// Run a read-only query against the latest state.
    async fn query(&self, query: ContractQuery) -> Result<Vec<u8>>;
}

/// Decode a query result.
pub(crate) async fn query_as<T: DeserializeOwned>(
    gateway: &dyn ContractGateway,
    query: ContractQuery,
) -> Result<T> {
    let method = query.method();
    let output = gateway.query(query).await?;
    decode_output(&output).map_err(|e| LedgerError::Malformed(format!("{method}: {e}")))
}

/// Decode a call's return value from its receipt.
pub(crate) fn output_of<T: DeserializeOwned>(submission: &Submission) -> Result<T> {
    decode_output(&submission.receipt.output)
        .map_err(|e| LedgerError::Malformed(format!("output of {}: {e}", submission.tx_hash)))
}

/// The ConsentManager, DataRegistry and KeyRecovery bindings of one connection.
pub struct ContractRegistry {
    addresses: ContractAddresses,
    orchestrator: TransactionOrchestrator,
}

impl ContractRegistry {
    pub fn new(addresses: ContractAddresses, orchestrator: TransactionOrchestrator) -> Self {
        Self {
            addresses,
            orchestrator,
        }
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }
}

#[async_trait]
impl ContractGateway for ContractRegistry {
    fn sender(&self) -> Address {
        self.orchestrator.connection().address()
    }

    async fn submit(&self, call: ContractCall, cancel: &CancellationToken) -> Result<Submission> {
        let to = self.addresses.address_of(call.contract());
        self.orchestrator.submit(to, &call, cancel).await
    }

    async fn query(&self, query: ContractQuery) -> Result<Vec<u8>> {
        let to = self.addresses.address_of(query.contract());
        self.orchestrator.connection().call(&to, &query).await
    }
}
