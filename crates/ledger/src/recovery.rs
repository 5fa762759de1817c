//! Guardian-threshold key recovery.
//!
//! An owner registers guardians, then opens a recovery request for a new key.
//! Guardians approve it from their own credentials; once the number of
//! distinct approvals reaches the contract's threshold the request is
//! actionable. Replacing the key is left to the contract.

use crate::error::{LedgerError, Result};
use crate::registry::{output_of, query_as, ContractGateway};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use steward_core::{
    Address, ContractCall, ContractQuery, Guardian, Hash, RecoveryRequest, RecoveryStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A confirmed recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryInitiated {
    pub tx_hash: Hash,
    pub request_id: Hash,
}

/// A confirmed approval and the request's progress after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryApproved {
    pub tx_hash: Hash,
    pub status: RecoveryStatus,
}

/// Approvals confirmed through this workflow, by request id.
#[derive(Debug, Default)]
struct ApprovalBook {
    approvers: HashMap<Hash, HashSet<Address>>,
}

impl ApprovalBook {
    fn has_approved(&self, request_id: &Hash, guardian: &Address) -> bool {
        self.approvers
            .get(request_id)
            .is_some_and(|set| set.contains(guardian))
    }

    fn record(&mut self, request_id: Hash, guardian: Address) {
        self.approvers.entry(request_id).or_default().insert(guardian);
    }
}

pub struct KeyRecoveryWorkflow {
    gateway: Arc<dyn ContractGateway>,
    book: Mutex<ApprovalBook>,
}

impl KeyRecoveryWorkflow {
    pub fn new(gateway: Arc<dyn ContractGateway>) -> Self {
        Self {
            gateway,
            book: Mutex::new(ApprovalBook::default()),
        }
    }

    /// Add `guardian` to the caller's guardian set. Open requests are unaffected.
    pub async fn add_guardian(
        &self,
        guardian: Address,
        commitment: Hash,
        cancel: &CancellationToken,
    ) -> Result<Hash> {
        if guardian.is_zero() {
            return Err(LedgerError::MissingField("guardian"));
        }
        let call = ContractCall::AddGuardian {
            guardian,
            commitment,
        };
        let submission = self.gateway.submit(call, cancel).await?;
        info!(%guardian, "Guardian added");
        Ok(submission.tx_hash)
    }

    /// Remove `guardian`. The contract refuses if the set would drop below
    /// its threshold; approvals the guardian gave stop counting.
    pub async fn remove_guardian(
        &self,
        guardian: Address,
        cancel: &CancellationToken,
    ) -> Result<Hash> {
        let submission = self
            .gateway
            .submit(ContractCall::RemoveGuardian { guardian }, cancel)
            .await?;
        info!(%guardian, "Guardian removed");
        Ok(submission.tx_hash)
    }

    pub async fn initiate(
        &self,
        new_key_hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<RecoveryInitiated> {
        if new_key_hash.is_zero() {
            return Err(LedgerError::MissingField("new_key_hash"));
        }
        let submission = self
            .gateway
            .submit(ContractCall::InitiateRecovery { new_key_hash }, cancel)
            .await?;
        let request_id: Hash = output_of(&submission)?;
        info!(request = %request_id, "Recovery initiated");
        Ok(RecoveryInitiated {
            tx_hash: submission.tx_hash,
            request_id,
        })
    }

    /// Approve `request_id` as the connected guardian.
    ///
    /// A second approval from the same guardian fails with
    /// [`LedgerError::DuplicateApproval`], locally when this workflow already
    /// saw the first one confirm and from the contract otherwise.
    pub async fn approve(
        &self,
        request_id: Hash,
        share_hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<RecoveryApproved> {
        let guardian = self.gateway.sender();
        if self.book().has_approved(&request_id, &guardian) {
            return Err(LedgerError::DuplicateApproval);
        }

        let call = ContractCall::ApproveRecovery {
            request_id,
            share_hash,
        };
        let submission = self.gateway.submit(call, cancel).await?;
        self.book().record(request_id, guardian);

        let status: RecoveryStatus = output_of(&submission)?;
        info!(
            request = %request_id,
            approvals = status.approvals,
            threshold = status.threshold,
            actionable = status.is_actionable(),
            "Recovery approved"
        );
        Ok(RecoveryApproved {
            tx_hash: submission.tx_hash,
            status,
        })
    }

    pub async fn guardians(&self, owner: Address) -> Result<Vec<Guardian>> {
        query_as(self.gateway.as_ref(), ContractQuery::Guardians { owner }).await
    }

    pub async fn status(&self, request_id: Hash) -> Result<RecoveryStatus> {
        query_as(
            self.gateway.as_ref(),
            ContractQuery::RecoveryStatus { request_id },
        )
        .await
    }

    /// The owner's request still collecting approvals, if any.
    pub async fn open_request(&self, owner: Address) -> Result<Option<RecoveryRequest>> {
        query_as(self.gateway.as_ref(), ContractQuery::OpenRecovery { owner }).await
    }

    fn book(&self) -> std::sync::MutexGuard<'_, ApprovalBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}
