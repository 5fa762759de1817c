//! Data registration and integrity verification.
//!
//! Registration carries a digest computed by the caller from the bytes held in
//! the content store. Storing and registering are independent steps, so
//! content that was stored but never registered is a normal state.

use crate::error::{LedgerError, Result};
use crate::registry::{output_of, query_as, ContractGateway};
use std::sync::Arc;
use steward_core::{ContractCall, ContractQuery, DataMetadata, DataRecord, Hash};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments of a data registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub cid: String,
    /// sha256 of the stored payload.
    pub content_hash: Hash,
    pub size: u64,
    pub is_encrypted: bool,
    /// Empty when the payload is stored in the clear.
    pub encryption_algorithm: String,
    pub metadata: DataMetadata,
}

impl Registration {
    /// An unencrypted payload with default metadata.
    pub fn plain(cid: impl Into<String>, content_hash: Hash, size: u64) -> Self {
        Self {
            cid: cid.into(),
            content_hash,
            size,
            is_encrypted: false,
            encryption_algorithm: String::new(),
            metadata: DataMetadata::default(),
        }
    }
}

/// A confirmed registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRegistered {
    pub tx_hash: Hash,
    pub record_id: Hash,
}

pub struct DataProvenanceWorkflow {
    gateway: Arc<dyn ContractGateway>,
}

impl DataProvenanceWorkflow {
    pub fn new(gateway: Arc<dyn ContractGateway>) -> Self {
        Self { gateway }
    }

    pub async fn register(
        &self,
        registration: Registration,
        cancel: &CancellationToken,
    ) -> Result<DataRegistered> {
        if registration.cid.trim().is_empty() {
            return Err(LedgerError::MissingField("cid"));
        }
        if registration.content_hash.is_zero() {
            return Err(LedgerError::MissingField("content_hash"));
        }

        let cid = registration.cid.clone();
        let call = ContractCall::RegisterData {
            cid: registration.cid,
            data_hash: registration.content_hash,
            size: registration.size,
            is_encrypted: registration.is_encrypted,
            encryption_algorithm: registration.encryption_algorithm,
            metadata: registration.metadata,
        };
        let submission = self.gateway.submit(call, cancel).await?;
        let record_id: Hash = output_of(&submission)?;
        info!(%cid, record = %record_id, "Data registered");
        Ok(DataRegistered {
            tx_hash: submission.tx_hash,
            record_id,
        })
    }

    /// Compare `content_hash` with the digest registered for `cid`.
    ///
    /// A mismatch is `Ok(false)`; an unregistered `cid` is `NotFound`.
    pub async fn verify_integrity(&self, cid: &str, content_hash: Hash) -> Result<bool> {
        query_as(
            self.gateway.as_ref(),
            ContractQuery::VerifyDataIntegrity {
                cid: cid.to_string(),
                data_hash: content_hash,
            },
        )
        .await
    }

    pub async fn record(&self, cid: &str) -> Result<DataRecord> {
        query_as(
            self.gateway.as_ref(),
            ContractQuery::DataRecord {
                cid: cid.to_string(),
            },
        )
        .await
    }
}
