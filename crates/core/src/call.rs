//! The fixed method surface of the three deployed contracts.
//!
//! Writes are [`ContractCall`]s carried as transaction calldata; reads are
//! [`ContractQuery`]s answered without a transaction. Both are bincode
//! encoded.

use crate::crypto::Address;
use crate::hash::Hash;
use crate::records::{DataMetadata, Purpose};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed calldata: {0}")]
pub struct CalldataError(#[from] bincode::Error);

/// The deployed contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Contract {
    ConsentManager,
    DataRegistry,
    KeyRecovery,
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Contract::ConsentManager => "ConsentManager",
            Contract::DataRegistry => "DataRegistry",
            Contract::KeyRecovery => "KeyRecovery",
        };
        f.write_str(name)
    }
}

/// Addresses the three contracts are deployed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub consent_manager: Address,
    pub data_registry: Address,
    pub key_recovery: Address,
}

impl ContractAddresses {
    /// Addresses of the three contracts deployed in order by `deployer`.
    pub fn deployed_by(deployer: &Address) -> Self {
        Self {
            consent_manager: Address::for_contract(deployer, 0),
            data_registry: Address::for_contract(deployer, 1),
            key_recovery: Address::for_contract(deployer, 2),
        }
    }

    pub fn address_of(&self, contract: Contract) -> Address {
        match contract {
            Contract::ConsentManager => self.consent_manager,
            Contract::DataRegistry => self.data_registry,
            Contract::KeyRecovery => self.key_recovery,
        }
    }

    /// Which contract lives at `address`, if any.
    pub fn contract_at(&self, address: &Address) -> Option<Contract> {
        [
            Contract::ConsentManager,
            Contract::DataRegistry,
            Contract::KeyRecovery,
        ]
        .into_iter()
        .find(|c| !address.is_zero() && self.address_of(*c) == *address)
    }
}

/// A state-changing contract method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    GrantConsent {
        researcher: Address,
        data_cid: String,
        purpose: Purpose,
        duration_days: u64,
        signature: Vec<u8>,
    },
    RevokeConsent {
        consent_id: Hash,
    },
    RegisterData {
        cid: String,
        data_hash: Hash,
        size: u64,
        is_encrypted: bool,
        encryption_algorithm: String,
        metadata: DataMetadata,
    },
    AddGuardian {
        guardian: Address,
        commitment: Hash,
    },
    RemoveGuardian {
        guardian: Address,
    },
    InitiateRecovery {
        new_key_hash: Hash,
    },
    ApproveRecovery {
        request_id: Hash,
        share_hash: Hash,
    },
}

impl ContractCall {
    pub fn contract(&self) -> Contract {
        match self {
            ContractCall::GrantConsent { .. } | ContractCall::RevokeConsent { .. } => {
                Contract::ConsentManager
            }
            ContractCall::RegisterData { .. } => Contract::DataRegistry,
            ContractCall::AddGuardian { .. }
            | ContractCall::RemoveGuardian { .. }
            | ContractCall::InitiateRecovery { .. }
            | ContractCall::ApproveRecovery { .. } => Contract::KeyRecovery,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::GrantConsent { .. } => "grantConsent",
            ContractCall::RevokeConsent { .. } => "revokeConsent",
            ContractCall::RegisterData { .. } => "registerData",
            ContractCall::AddGuardian { .. } => "addGuardian",
            ContractCall::RemoveGuardian { .. } => "removeGuardian",
            ContractCall::InitiateRecovery { .. } => "initiateRecovery",
            ContractCall::ApproveRecovery { .. } => "approveRecovery",
        }
    }

    /// Gas limit attached when the call is submitted.
    pub fn gas_limit(&self) -> u64 {
        match self {
            ContractCall::GrantConsent { .. } => 300_000,
            ContractCall::RevokeConsent { .. } => 100_000,
            ContractCall::RegisterData { .. } => 500_000,
            ContractCall::AddGuardian { .. } | ContractCall::RemoveGuardian { .. } => 100_000,
            ContractCall::InitiateRecovery { .. } => 200_000,
            ContractCall::ApproveRecovery { .. } => 150_000,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization should not fail")
    }

    pub fn decode(data: &[u8]) -> Result<Self, CalldataError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// A read-only contract method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractQuery {
    /// → `bool`
    VerifyConsent {
        subject: Address,
        researcher: Address,
        data_cid: String,
    },
    /// → `Vec<ConsentGrant>`
    UserConsents { subject: Address },
    /// → `bool`, reverts with `DataNotFound` for unknown CIDs
    VerifyDataIntegrity { cid: String, data_hash: Hash },
    /// → `DataRecord`, reverts with `DataNotFound`
    DataRecord { cid: String },
    /// → `Vec<Guardian>`
    Guardians { owner: Address },
    /// → `RecoveryStatus`, reverts with `RecoveryNotFound`
    RecoveryStatus { request_id: Hash },
    /// → `Option<RecoveryRequest>`
    OpenRecovery { owner: Address },
}

impl ContractQuery {
    pub fn contract(&self) -> Contract {
        match self {
            ContractQuery::VerifyConsent { .. } | ContractQuery::UserConsents { .. } => {
                Contract::ConsentManager
            }
            ContractQuery::VerifyDataIntegrity { .. } | ContractQuery::DataRecord { .. } => {
                Contract::DataRegistry
            }
            ContractQuery::Guardians { .. }
            | ContractQuery::RecoveryStatus { .. }
            | ContractQuery::OpenRecovery { .. } => Contract::KeyRecovery,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ContractQuery::VerifyConsent { .. } => "verifyConsent",
            ContractQuery::UserConsents { .. } => "getUserConsents",
            ContractQuery::VerifyDataIntegrity { .. } => "verifyDataIntegrity",
            ContractQuery::DataRecord { .. } => "getDataRecord",
            ContractQuery::Guardians { .. } => "getGuardians",
            ContractQuery::RecoveryStatus { .. } => "getRecoveryStatus",
            ContractQuery::OpenRecovery { .. } => "getOpenRecovery",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization should not fail")
    }

    pub fn decode(data: &[u8]) -> Result<Self, CalldataError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Encode a query or call return value.
pub fn encode_output<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("serialization should not fail")
}

/// Decode a query or call return value.
pub fn decode_output<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, CalldataError> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_route_to_their_contract() {
        let grant = ContractCall::GrantConsent {
            researcher: Address::ZERO,
            data_cid: "bafk".into(),
            purpose: Purpose::Research,
            duration_days: 30,
            signature: vec![],
        };
        assert_eq!(grant.contract(), Contract::ConsentManager);
        assert_eq!(grant.method(), "grantConsent");
        assert_eq!(grant.gas_limit(), 300_000);

        let approve = ContractCall::ApproveRecovery {
            request_id: Hash::ZERO,
            share_hash: Hash::ZERO,
        };
        assert_eq!(approve.contract(), Contract::KeyRecovery);

        let verify = ContractQuery::VerifyDataIntegrity {
            cid: "bafk".into(),
            data_hash: Hash::ZERO,
        };
        assert_eq!(verify.contract(), Contract::DataRegistry);
    }

    #[test]
    fn test_calldata_decodes_to_same_call() {
        let call = ContractCall::RegisterData {
            cid: "bafkreia".into(),
            data_hash: crate::hash::sha256(b"x"),
            size: 1,
            is_encrypted: true,
            encryption_algorithm: "AES-256-GCM".into(),
            metadata: DataMetadata::default(),
        };
        assert_eq!(ContractCall::decode(&call.encode()).unwrap(), call);
    }

    #[test]
    fn test_deployed_addresses_are_distinct() {
        let deployer = Address::from_bytes([9u8; 20]);
        let addrs = ContractAddresses::deployed_by(&deployer);
        assert_ne!(addrs.consent_manager, addrs.data_registry);
        assert_ne!(addrs.data_registry, addrs.key_recovery);
        assert_eq!(
            addrs.contract_at(&addrs.key_recovery),
            Some(Contract::KeyRecovery)
        );
        assert_eq!(addrs.contract_at(&Address::ZERO), None);
        assert_eq!(ContractAddresses::default().contract_at(&Address::ZERO), None);
    }

    #[test]
    fn test_garbage_calldata_is_rejected() {
        assert!(ContractCall::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
