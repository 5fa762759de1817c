//! Core primitives for the steward ledger client.
//!
//! This crate provides the types shared by every other crate:
//! - Digests (blake3 identifiers, sha256 content hashes)
//! - The ed25519 signing credential and ledger addresses
//! - Signed contract-call transactions
//! - The fixed method surface of the ConsentManager, DataRegistry and
//!   KeyRecovery contracts, and the records they keep
//! - The [`LedgerRpc`] trait every ledger node client implements

pub mod call;
pub mod crypto;
pub mod hash;
pub mod records;
pub mod rpc;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use call::{
    decode_output, encode_output, CalldataError, Contract, ContractAddresses, ContractCall,
    ContractQuery,
};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, sha256, Hash, H256};
pub use records::{
    revert, Approval, ConsentGrant, DataMetadata, DataRecord, Guardian, Purpose, RecoveryPhase,
    RecoveryRequest, RecoveryStatus, SECONDS_PER_DAY,
};
pub use rpc::{LedgerRpc, Receipt, ReceiptStatus, RpcError, RpcRequest, RpcResponse};
pub use transaction::{Transaction, TransactionError};
