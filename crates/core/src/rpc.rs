//! The ledger node RPC surface.
//!
//! [`LedgerRpc`] is the seam between the client and whatever node it talks
//! to: the HTTP client in `steward-ledger` implements it for remote nodes, the
//! development ledger implements it in-process. [`RpcRequest`] and
//! [`RpcResponse`] are the JSON messages exchanged over HTTP.

use crate::crypto::Address;
use crate::hash::Hash;
use crate::transaction::Transaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a ledger node.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RpcError {
    /// The node could not be reached or the transport failed.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The node refused a transaction before inclusion.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// A read-only call was rejected by the contract.
    #[error("call reverted: {0}")]
    Reverted(String),

    /// The node answered with something the client cannot interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted(String),
}

/// Inclusion receipt for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_number: u64,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    /// Return value of the contract method, bincode encoded.
    pub output: Vec<u8>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Primitives a ledger node offers to the client.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Network chain identifier.
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Suggested gas price for a new transaction.
    async fn gas_price(&self) -> Result<u64, RpcError>;

    /// Next nonce for `address`, counting transactions still pending.
    async fn pending_nonce(&self, address: &Address) -> Result<u64, RpcError>;

    /// Broadcast a signed transaction, returning its hash.
    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash, RpcError>;

    /// Receipt of an included transaction, `None` while pending or unknown.
    async fn receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, RpcError>;

    /// Number of the latest block.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Read-only contract invocation against the latest state.
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError>;
}

#[async_trait]
impl<T: LedgerRpc + ?Sized> LedgerRpc for Arc<T> {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        (**self).chain_id().await
    }

    async fn gas_price(&self) -> Result<u64, RpcError> {
        (**self).gas_price().await
    }

    async fn pending_nonce(&self, address: &Address) -> Result<u64, RpcError> {
        (**self).pending_nonce(address).await
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash, RpcError> {
        (**self).send_transaction(tx).await
    }

    async fn receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, RpcError> {
        (**self).receipt(tx_hash).await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        (**self).block_number().await
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        (**self).call(to, data).await
    }
}

/// A JSON RPC request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    ChainId,
    GasPrice,
    PendingNonce { address: Address },
    SendTransaction { transaction: Transaction },
    Receipt { tx_hash: Hash },
    BlockNumber,
    Call { to: Address, data: Vec<u8> },
}

/// A JSON RPC response body: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    Result(serde_json::Value),
    Error(RpcError),
}

impl RpcResponse {
    pub fn from_result<T: Serialize>(result: Result<T, RpcError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(json) => RpcResponse::Result(json),
                Err(e) => RpcResponse::Error(RpcError::Malformed(e.to_string())),
            },
            Err(err) => RpcResponse::Error(err),
        }
    }

    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T, RpcError> {
        match self {
            RpcResponse::Result(json) => {
                serde_json::from_value(json).map_err(|e| RpcError::Malformed(e.to_string()))
            }
            RpcResponse::Error(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::ContractCall;
    use crate::crypto::Keypair;

    #[test]
    fn test_request_wire_shape() {
        let req = RpcRequest::PendingNonce {
            address: Address::from_bytes([0xAB; 20]),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "pending_nonce");
        assert_eq!(json["params"]["address"], Address::from_bytes([0xAB; 20]).to_hex());

        let unit = serde_json::to_value(RpcRequest::ChainId).unwrap();
        assert_eq!(unit["method"], "chain_id");
    }

    #[test]
    fn test_transaction_survives_json() {
        let kp = Keypair::generate();
        let call = ContractCall::InitiateRecovery {
            new_key_hash: crate::hash::sha256(b"new key"),
        };
        let tx = Transaction::call(7, 3, kp.public_key.clone(), Address::ZERO, &call, 2)
            .signed(&kp);
        let req = RpcRequest::SendTransaction {
            transaction: tx.clone(),
        };
        let back: RpcRequest = serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        match back {
            RpcRequest::SendTransaction { transaction } => {
                assert_eq!(transaction, tx);
                assert!(transaction.verify().is_ok());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_response_carries_typed_errors() {
        let resp = RpcResponse::from_result::<u64>(Err(RpcError::Rejected("nonce too low".into())));
        let json = serde_json::to_string(&resp).unwrap();
        let back: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.into_result::<u64>(),
            Err(RpcError::Rejected("nonce too low".into()))
        );

        let ok = RpcResponse::from_result(Ok(42u64));
        assert_eq!(ok.into_result::<u64>(), Ok(42));
    }

    #[test]
    fn test_receipt_status_json() {
        let receipt = Receipt {
            tx_hash: Hash::ZERO,
            block_number: 1,
            status: ReceiptStatus::Reverted("DuplicateApproval".into()),
            gas_used: 21_000,
            output: vec![],
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"]["status"], "reverted");
        assert_eq!(json["status"]["reason"], "DuplicateApproval");
        assert!(!receipt.is_success());
    }
}
