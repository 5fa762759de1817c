//! A session with one ledger node under one signing credential.

use crate::error::{LedgerError, Result};
use std::sync::Arc;
use steward_core::{Address, ContractQuery, Keypair, LedgerRpc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Network and account the connection acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerIdentity {
    pub chain_id: u64,
    pub address: Address,
}

/// Owns the signing credential and its nonce counter.
///
/// Writes must go through [`TransactionOrchestrator`](crate::TransactionOrchestrator),
/// which holds the nonce lock from nonce assignment until the broadcast
/// returns. Reads may run concurrently.
pub struct LedgerConnection {
    rpc: Arc<dyn LedgerRpc>,
    credential: Keypair,
    identity: LedgerIdentity,
    /// Next nonce to use; `None` until fetched or after a failed broadcast.
    nonce: Mutex<Option<u64>>,
}

impl LedgerConnection {
    /// Resolve the network identity and bind `credential` to it.
    pub async fn connect(
        rpc: Arc<dyn LedgerRpc>,
        credential: Keypair,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let chain_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled { tx_hash: None }),
            id = rpc.chain_id() => id?,
        };
        let identity = LedgerIdentity {
            chain_id,
            address: credential.address(),
        };
        info!(chain_id, address = %identity.address, "Connected to ledger");
        Ok(Self {
            rpc,
            credential,
            identity,
            nonce: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> LedgerIdentity {
        self.identity
    }

    pub fn address(&self) -> Address {
        self.identity.address
    }

    pub fn rpc(&self) -> &dyn LedgerRpc {
        self.rpc.as_ref()
    }

    pub(crate) fn credential(&self) -> &Keypair {
        &self.credential
    }

    pub(crate) async fn lock_nonce(&self) -> MutexGuard<'_, Option<u64>> {
        self.nonce.lock().await
    }

    /// Read-only contract call at `to`.
    pub async fn call(&self, to: &Address, query: &ContractQuery) -> Result<Vec<u8>> {
        Ok(self.rpc.call(to, &query.encode()).await?)
    }
}
