//! [`LedgerRpc`] over HTTP.
//!
//! Each primitive is one `POST` of a JSON [`RpcRequest`] to the node URL,
//! answered by a JSON [`RpcResponse`].

use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use steward_core::{
    Address, Hash, LedgerRpc, Receipt, RpcError, RpcRequest, RpcResponse, Transaction,
};
use tracing::trace;

/// HTTP client for a ledger node.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use steward_core::LedgerRpc;
/// use steward_ledger::HttpRpc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let rpc = HttpRpc::new("http://127.0.0.1:8545", Duration::from_secs(30))?;
/// let chain_id = rpc.chain_id().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpRpc {
    url: String,
    client: reqwest::Client,
}

impl HttpRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::ConnectionFailure(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: DeserializeOwned>(&self, request: RpcRequest) -> std::result::Result<T, RpcError> {
        trace!(url = %self.url, ?request, "RPC request");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Connection(format!("HTTP {status}: {body}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        body.into_result()
    }
}

#[async_trait]
impl LedgerRpc for HttpRpc {
    async fn chain_id(&self) -> std::result::Result<u64, RpcError> {
        self.request(RpcRequest::ChainId).await
    }

    async fn gas_price(&self) -> std::result::Result<u64, RpcError> {
        self.request(RpcRequest::GasPrice).await
    }

    async fn pending_nonce(&self, address: &Address) -> std::result::Result<u64, RpcError> {
        self.request(RpcRequest::PendingNonce { address: *address })
            .await
    }

    async fn send_transaction(&self, tx: &Transaction) -> std::result::Result<Hash, RpcError> {
        self.request(RpcRequest::SendTransaction {
            transaction: tx.clone(),
        })
        .await
    }

    async fn receipt(&self, tx_hash: &Hash) -> std::result::Result<Option<Receipt>, RpcError> {
        self.request(RpcRequest::Receipt { tx_hash: *tx_hash })
            .await
    }

    async fn block_number(&self) -> std::result::Result<u64, RpcError> {
        self.request(RpcRequest::BlockNumber).await
    }

    async fn call(&self, to: &Address, data: &[u8]) -> std::result::Result<Vec<u8>, RpcError> {
        self.request(RpcRequest::Call {
            to: *to,
            data: data.to_vec(),
        })
        .await
    }
}
