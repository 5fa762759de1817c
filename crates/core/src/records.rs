//! Records kept by the three contracts.
//!
//! The contracts own these values; the client only ever sees copies returned
//! by read-only queries.

use crate::crypto::Address;
use crate::hash::{hash_concat, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds in one day, the unit of consent durations.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Why a researcher is being granted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    Research,
    Medical,
    Commercial,
    Personal,
}

impl Purpose {
    /// On-ledger code of the purpose.
    pub fn code(&self) -> u8 {
        match self {
            Purpose::Research => 0,
            Purpose::Medical => 1,
            Purpose::Commercial => 2,
            Purpose::Personal => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Purpose::Research),
            1 => Some(Purpose::Medical),
            2 => Some(Purpose::Commercial),
            3 => Some(Purpose::Personal),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Purpose::Research => "research",
            Purpose::Medical => "medical",
            Purpose::Commercial => "commercial",
            Purpose::Personal => "personal",
        };
        f.write_str(name)
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "research" | "0" => Ok(Purpose::Research),
            "medical" | "1" => Ok(Purpose::Medical),
            "commercial" | "2" => Ok(Purpose::Commercial),
            "personal" | "3" => Ok(Purpose::Personal),
            other => Err(format!("unknown purpose: {other}")),
        }
    }
}

/// A consent grant from a data subject to a researcher.
///
/// Expiry is derived from `expires_at`; nothing on the ledger is mutated when
/// a grant lapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub id: Hash,
    pub subject: Address,
    pub researcher: Address,
    pub data_cid: String,
    pub purpose: Purpose,
    pub granted_at: u64,
    pub expires_at: u64,
    pub revoked: bool,
    pub signature: Vec<u8>,
}

impl ConsentGrant {
    /// Id of the grant the subject creates with the given transaction nonce.
    pub fn derive_id(subject: &Address, researcher: &Address, data_cid: &str, nonce: u64) -> Hash {
        hash_concat(&[
            b"consent",
            subject.as_ref(),
            researcher.as_ref(),
            data_cid.as_bytes(),
            &nonce.to_le_bytes(),
        ])
    }

    /// Whether the grant still authorizes access at unix time `now`.
    pub fn is_active(&self, now: u64) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Acquisition metadata of a recorded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMetadata {
    pub session_id: String,
    pub sample_rate: u64,
    pub channel_count: u64,
    pub duration_secs: u64,
    pub format: String,
}

impl Default for DataMetadata {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            sample_rate: 256,
            channel_count: 4,
            duration_secs: 0,
            format: "float32".to_string(),
        }
    }
}

/// Provenance record for one content identifier. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub record_id: Hash,
    pub cid: String,
    pub owner: Address,
    pub data_hash: Hash,
    pub size: u64,
    pub created_at: u64,
    pub is_encrypted: bool,
    pub encryption_algorithm: String,
    pub metadata: DataMetadata,
}

impl DataRecord {
    pub fn derive_id(owner: &Address, cid: &str) -> Hash {
        hash_concat(&[b"record", owner.as_ref(), cid.as_bytes()])
    }
}

/// A recovery guardian and the commitment to its secret share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub address: Address,
    pub commitment: Hash,
    pub added_at: u64,
}

/// One guardian's approval of a recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub guardian: Address,
    pub share_hash: Hash,
}

/// A request to rotate the owner's key, approved by guardians.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub id: Hash,
    pub owner: Address,
    pub new_key_hash: Hash,
    pub initiated_at: u64,
    pub approvals: Vec<Approval>,
}

impl RecoveryRequest {
    pub fn derive_id(owner: &Address, new_key_hash: &Hash, nonce: u64) -> Hash {
        hash_concat(&[
            b"recovery",
            owner.as_ref(),
            new_key_hash.as_ref(),
            &nonce.to_le_bytes(),
        ])
    }

    pub fn has_approved(&self, guardian: &Address) -> bool {
        self.approvals.iter().any(|a| a.guardian == *guardian)
    }
}

/// Lifecycle of a recovery request as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryPhase {
    /// No approvals yet.
    Initiated,
    /// Some approvals, below threshold.
    Approving,
    /// Threshold reached; execution is up to the contract.
    Actionable,
}

/// Threshold progress of a recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub request_id: Hash,
    pub owner: Address,
    /// Approvals from guardians that are still active.
    pub approvals: u64,
    pub threshold: u64,
    pub phase: RecoveryPhase,
}

impl RecoveryStatus {
    pub fn new(request_id: Hash, owner: Address, approvals: u64, threshold: u64) -> Self {
        let phase = if approvals >= threshold {
            RecoveryPhase::Actionable
        } else if approvals == 0 {
            RecoveryPhase::Initiated
        } else {
            RecoveryPhase::Approving
        };
        Self {
            request_id,
            owner,
            approvals,
            threshold,
            phase,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.phase == RecoveryPhase::Actionable
    }
}

/// Revert reasons emitted by the contracts.
///
/// Clients match on these strings to turn a revert into a typed error.
pub mod revert {
    pub const CONSENT_NOT_FOUND: &str = "ConsentNotFound";
    pub const DATA_NOT_FOUND: &str = "DataNotFound";
    pub const DATA_ALREADY_REGISTERED: &str = "DataAlreadyRegistered";
    pub const RECOVERY_NOT_FOUND: &str = "RecoveryNotFound";
    pub const RECOVERY_ALREADY_OPEN: &str = "RecoveryAlreadyOpen";
    pub const DUPLICATE_APPROVAL: &str = "DuplicateApproval";
    pub const NOT_GUARDIAN: &str = "NotGuardian";
    pub const GUARDIAN_EXISTS: &str = "GuardianExists";
    pub const GUARDIAN_NOT_FOUND: &str = "GuardianNotFound";
    pub const GUARDIAN_SET_BELOW_THRESHOLD: &str = "GuardianSetBelowThreshold";
    pub const INSUFFICIENT_GUARDIANS: &str = "InsufficientGuardians";
    pub const OUT_OF_GAS: &str = "OutOfGas";
    pub const UNKNOWN_CONTRACT: &str = "UnknownContract";
    pub const MALFORMED_CALLDATA: &str = "MalformedCalldata";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_at: u64, revoked: bool) -> ConsentGrant {
        ConsentGrant {
            id: Hash::ZERO,
            subject: Address::from_bytes([1u8; 20]),
            researcher: Address::from_bytes([2u8; 20]),
            data_cid: "bafk".into(),
            purpose: Purpose::Research,
            granted_at: 100,
            expires_at,
            revoked,
            signature: vec![],
        }
    }

    #[test]
    fn test_purpose_codes() {
        for code in 0..4u8 {
            let purpose = Purpose::from_code(code).unwrap();
            assert_eq!(purpose.code(), code);
        }
        assert!(Purpose::from_code(4).is_none());
        assert_eq!("Medical".parse::<Purpose>().unwrap(), Purpose::Medical);
        assert!("spying".parse::<Purpose>().is_err());
    }

    #[test]
    fn test_consent_expiry_is_derived() {
        let g = grant(200, false);
        assert!(g.is_active(100));
        assert!(g.is_active(199));
        assert!(!g.is_active(200));
        assert!(!grant(200, true).is_active(150));
    }

    #[test]
    fn test_consent_ids_depend_on_nonce() {
        let s = Address::from_bytes([1u8; 20]);
        let r = Address::from_bytes([2u8; 20]);
        assert_ne!(
            ConsentGrant::derive_id(&s, &r, "cid", 0),
            ConsentGrant::derive_id(&s, &r, "cid", 1)
        );
    }

    #[test]
    fn test_recovery_phase() {
        let id = Hash::ZERO;
        let owner = Address::ZERO;
        assert_eq!(RecoveryStatus::new(id, owner, 0, 3).phase, RecoveryPhase::Initiated);
        assert_eq!(RecoveryStatus::new(id, owner, 2, 3).phase, RecoveryPhase::Approving);
        assert!(RecoveryStatus::new(id, owner, 3, 3).is_actionable());
    }

    #[test]
    fn test_default_metadata() {
        let meta = DataMetadata::default();
        assert_eq!(meta.sample_rate, 256);
        assert_eq!(meta.channel_count, 4);
        assert_eq!(meta.format, "float32");
    }
}
