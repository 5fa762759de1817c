//! Ledger client errors.

use std::time::Duration;
use steward_core::{revert, CryptoError, Hash, RpcError};
use thiserror::Error;

/// Errors returned by the ledger connection, the orchestrator and the
/// workflows built on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger node could not be reached.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Invalid signing credential: {0}")]
    InvalidCredential(String),

    /// The suggested gas price could not be obtained; nothing was broadcast.
    #[error("Fee quote failed: {0}")]
    FeeQuoteFailure(String),

    /// The node refused the signed transaction before inclusion.
    #[error("Submission failed: {0}")]
    SubmissionFailure(String),

    /// Included (or called) but rejected by the contract.
    #[error("Reverted: {reason}")]
    Reverted {
        reason: String,
        tx_hash: Option<Hash>,
    },

    /// Broadcast succeeded but the transaction was not final in time.
    #[error("Transaction {tx_hash} not confirmed within {waited:?}")]
    TimedOut { tx_hash: Hash, waited: Duration },

    /// Unknown consent id, content identifier or recovery request.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Guardian already approved this recovery request")]
    DuplicateApproval,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A required argument was empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The caller cancelled. `tx_hash` is set once the broadcast happened;
    /// the transaction may still be included.
    #[error("Cancelled{}", .tx_hash.map(|h| format!(" after broadcasting {h}")).unwrap_or_default())]
    Cancelled { tx_hash: Option<Hash> },

    /// The node answered with data the client cannot decode.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Classify a contract revert reason.
    pub fn from_revert(reason: &str, tx_hash: Option<Hash>) -> Self {
        match reason {
            revert::CONSENT_NOT_FOUND
            | revert::DATA_NOT_FOUND
            | revert::RECOVERY_NOT_FOUND
            | revert::GUARDIAN_NOT_FOUND => LedgerError::NotFound(reason.to_string()),
            revert::DUPLICATE_APPROVAL => LedgerError::DuplicateApproval,
            _ => LedgerError::Reverted {
                reason: reason.to_string(),
                tx_hash,
            },
        }
    }

    /// Hash of the broadcast transaction this error concerns, if any.
    pub fn tx_hash(&self) -> Option<Hash> {
        match self {
            LedgerError::Reverted { tx_hash, .. } | LedgerError::Cancelled { tx_hash } => *tx_hash,
            LedgerError::TimedOut { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

impl From<RpcError> for LedgerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Connection(msg) => LedgerError::ConnectionFailure(msg),
            RpcError::Rejected(msg) => LedgerError::SubmissionFailure(msg),
            RpcError::Reverted(reason) => LedgerError::from_revert(&reason, None),
            RpcError::Malformed(msg) => LedgerError::Malformed(msg),
        }
    }
}

impl From<CryptoError> for LedgerError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidAddress => LedgerError::InvalidAddress(err.to_string()),
            other => LedgerError::InvalidCredential(other.to_string()),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_classification() {
        assert_eq!(
            LedgerError::from_revert(revert::CONSENT_NOT_FOUND, None),
            LedgerError::NotFound(revert::CONSENT_NOT_FOUND.into())
        );
        assert_eq!(
            LedgerError::from_revert(revert::DUPLICATE_APPROVAL, None),
            LedgerError::DuplicateApproval
        );
        let hash = steward_core::hash(b"tx");
        let err = LedgerError::from_revert(revert::NOT_GUARDIAN, Some(hash));
        assert_eq!(err.tx_hash(), Some(hash));
        assert!(matches!(err, LedgerError::Reverted { ref reason, .. } if reason == "NotGuardian"));
    }

    #[test]
    fn test_rpc_error_mapping() {
        assert!(matches!(
            LedgerError::from(RpcError::Connection("refused".into())),
            LedgerError::ConnectionFailure(_)
        ));
        assert!(matches!(
            LedgerError::from(RpcError::Rejected("nonce".into())),
            LedgerError::SubmissionFailure(_)
        ));
        assert_eq!(
            LedgerError::from(RpcError::Reverted(revert::DATA_NOT_FOUND.into())),
            LedgerError::NotFound(revert::DATA_NOT_FOUND.into())
        );
    }

    #[test]
    fn test_cancelled_message_names_hash() {
        assert_eq!(LedgerError::Cancelled { tx_hash: None }.to_string(), "Cancelled");
        let hash = steward_core::hash(b"tx");
        let msg = LedgerError::Cancelled { tx_hash: Some(hash) }.to_string();
        assert!(msg.contains(&hash.to_string()));
    }
}
