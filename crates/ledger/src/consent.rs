//! Consent granting, verification and revocation.

use crate::error::{LedgerError, Result};
use crate::registry::{output_of, query_as, ContractGateway};
use std::sync::Arc;
use steward_core::{
    hash_concat, Address, ConsentGrant, ContractCall, ContractQuery, Hash, Keypair, Purpose,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A confirmed grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentGranted {
    pub tx_hash: Hash,
    /// Id to revoke the grant by.
    pub consent_id: Hash,
}

/// Digest a subject signs to attest the terms of a grant.
pub fn consent_terms(
    researcher: &Address,
    data_reference: &str,
    purpose: Purpose,
    duration_days: u64,
) -> Hash {
    hash_concat(&[
        b"consent",
        researcher.as_ref(),
        data_reference.as_bytes(),
        &[purpose.code()],
        &duration_days.to_le_bytes(),
    ])
}

/// Sign [`consent_terms`] with the subject's credential.
pub fn sign_consent_terms(
    subject: &Keypair,
    researcher: &Address,
    data_reference: &str,
    purpose: Purpose,
    duration_days: u64,
) -> Vec<u8> {
    let terms = consent_terms(researcher, data_reference, purpose, duration_days);
    subject.sign_hash(&terms).as_bytes().to_vec()
}

pub struct ConsentWorkflow {
    gateway: Arc<dyn ContractGateway>,
}

impl ConsentWorkflow {
    pub fn new(gateway: Arc<dyn ContractGateway>) -> Self {
        Self { gateway }
    }

    /// Grant `researcher` access to `data_reference` for `duration_days`.
    ///
    /// The signature is passed through untouched; the contract decides what
    /// it accepts.
    pub async fn grant(
        &self,
        researcher: Address,
        data_reference: &str,
        purpose: Purpose,
        duration_days: u64,
        signature: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<ConsentGranted> {
        if researcher.is_zero() {
            return Err(LedgerError::MissingField("researcher"));
        }
        if data_reference.trim().is_empty() {
            return Err(LedgerError::MissingField("data_reference"));
        }
        if signature.is_empty() {
            return Err(LedgerError::MissingField("signature"));
        }

        let call = ContractCall::GrantConsent {
            researcher,
            data_cid: data_reference.to_string(),
            purpose,
            duration_days,
            signature,
        };
        let submission = self.gateway.submit(call, cancel).await?;
        let consent_id: Hash = output_of(&submission)?;
        info!(consent = %consent_id, %researcher, data = data_reference, "Consent granted");
        Ok(ConsentGranted {
            tx_hash: submission.tx_hash,
            consent_id,
        })
    }

    /// Whether `subject` currently grants `researcher` access to `data_reference`.
    pub async fn verify(
        &self,
        subject: Address,
        researcher: Address,
        data_reference: &str,
    ) -> Result<bool> {
        query_as(
            self.gateway.as_ref(),
            ContractQuery::VerifyConsent {
                subject,
                researcher,
                data_cid: data_reference.to_string(),
            },
        )
        .await
    }

    /// Revoke an active grant owned by this connection's credential.
    pub async fn revoke(&self, consent_id: Hash, cancel: &CancellationToken) -> Result<Hash> {
        let submission = self
            .gateway
            .submit(ContractCall::RevokeConsent { consent_id }, cancel)
            .await?;
        info!(consent = %consent_id, "Consent revoked");
        Ok(submission.tx_hash)
    }

    /// Every grant `subject` has issued, including revoked and expired ones.
    pub async fn consents_of(&self, subject: Address) -> Result<Vec<ConsentGrant>> {
        query_as(self.gateway.as_ref(), ContractQuery::UserConsents { subject }).await
    }
}
