//! Signed contract-call transactions.

use crate::call::ContractCall;
use crate::crypto::{Address, Keypair, PublicKey, Signature};
use crate::hash::{hash, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gas charged for every transaction before calldata.
pub const BASE_GAS: u64 = 21_000;
/// Gas charged per calldata byte.
pub const GAS_PER_BYTE: u64 = 16;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("wrong chain (expected {expected}, got {got})")]
    WrongChain { expected: u64, got: u64 },
}

/// A contract call signed by the sender's credential.
///
/// The sender's public key travels with the transaction; `from()` is derived
/// from it so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Network the transaction is valid on.
    pub chain_id: u64,
    /// Sender's sequence number.
    pub nonce: u64,
    /// Sender's public key.
    pub public_key: PublicKey,
    /// Contract being called.
    pub to: Address,
    /// Encoded [`ContractCall`].
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    chain_id: u64,
    nonce: u64,
    public_key: &'a PublicKey,
    to: &'a Address,
    data: &'a [u8],
    gas_limit: u64,
    gas_price: u64,
}

impl Transaction {
    /// Build an unsigned call of `call` to the contract at `to`.
    pub fn call(
        chain_id: u64,
        nonce: u64,
        public_key: PublicKey,
        to: Address,
        call: &ContractCall,
        gas_price: u64,
    ) -> Self {
        Self {
            chain_id,
            nonce,
            public_key,
            to,
            data: call.encode(),
            gas_limit: call.gas_limit(),
            gas_price,
            signature: Signature::default(),
        }
    }

    /// Sender address.
    pub fn from(&self) -> Address {
        self.public_key.to_address()
    }

    /// Hash of everything but the signature (what gets signed).
    pub fn signing_hash(&self) -> Hash {
        let unsigned = UnsignedTransaction {
            chain_id: self.chain_id,
            nonce: self.nonce,
            public_key: &self.public_key,
            to: &self.to,
            data: &self.data,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        };
        let encoded = bincode::serialize(&unsigned).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Transaction identifier (includes the signature).
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        let hash = self.signing_hash();
        self.signature = keypair.sign_hash(&hash);
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    /// Verify the signature against the embedded public key.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let hash = self.signing_hash();
        self.public_key
            .verify(hash.as_bytes(), &self.signature)
            .map_err(|_| TransactionError::VerificationFailed)
    }

    pub fn verify_for_chain(&self, chain_id: u64) -> Result<(), TransactionError> {
        if self.chain_id != chain_id {
            return Err(TransactionError::WrongChain {
                expected: chain_id,
                got: self.chain_id,
            });
        }
        self.verify()
    }

    /// Gas consumed before any contract logic runs.
    pub fn intrinsic_gas(&self) -> u64 {
        BASE_GAS + self.data.len() as u64 * GAS_PER_BYTE
    }

    /// Decode the calldata back into a call.
    pub fn decode_call(&self) -> Result<ContractCall, crate::call::CalldataError> {
        ContractCall::decode(&self.data)
    }
}
