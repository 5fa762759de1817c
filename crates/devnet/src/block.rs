//! Blocks produced by the development ledger.

use serde::{Deserialize, Serialize};
use steward_core::{hash, hash_concat, Hash};

/// Block header plus the hashes of the transactions it includes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (0 for genesis).
    pub number: u64,
    /// Unix timestamp in seconds, as seen by the ledger clock.
    pub timestamp: u64,
    pub parent_hash: Hash,
    /// Merkle root of `transactions`.
    pub tx_root: Hash,
    pub transactions: Vec<Hash>,
}

impl Block {
    pub fn genesis(timestamp: u64) -> Self {
        Self {
            number: 0,
            timestamp,
            parent_hash: Hash::ZERO,
            tx_root: Hash::ZERO,
            transactions: Vec::new(),
        }
    }

    /// Child of `parent` including `transactions`.
    pub fn next(parent: &Block, timestamp: u64, transactions: Vec<Hash>) -> Self {
        Self {
            number: parent.number + 1,
            // The ledger clock never runs backwards across blocks.
            timestamp: timestamp.max(parent.timestamp),
            parent_hash: parent.hash(),
            tx_root: merkle_root(&transactions),
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }
}

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash if the list is empty. An odd node at any level is
/// paired with itself.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                hash_concat(&[pair[0].as_ref(), right.as_ref()])
            })
            .collect();
    }
    level[0]
}
