//! Pool of broadcast transactions waiting for a block.
//!
//! Transactions are admitted only with the sender's exact next nonce, so each
//! sender's queue is always contiguous and already in execution order.

use std::collections::{HashMap, VecDeque};
use steward_core::{Address, Hash, Transaction};
use thiserror::Error;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    DuplicateTransaction,

    #[error("mempool is full (capacity: {0})")]
    MempoolFull(usize),
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Configuration for the mempool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,
    /// Maximum transactions per account.
    pub max_per_account: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_account: 100,
        }
    }
}

/// Transaction mempool.
pub struct Mempool {
    config: MempoolConfig,
    /// Transactions indexed by hash.
    transactions: HashMap<Hash, Transaction>,
    /// Transaction hashes grouped by sender, lowest nonce first.
    by_sender: HashMap<Address, VecDeque<Hash>>,
    /// Arrival order, used to interleave senders fairly.
    arrival: Vec<Hash>,
}

impl Mempool {
    /// Create a new mempool with default configuration.
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create a new mempool with the given configuration.
    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: HashMap::new(),
            by_sender: HashMap::new(),
            arrival: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    /// Number of queued transactions from `sender`.
    pub fn pending_for(&self, sender: &Address) -> u64 {
        self.by_sender.get(sender).map_or(0, |q| q.len() as u64)
    }

    /// Add a transaction to the mempool.
    pub fn add(&mut self, tx: Transaction) -> Result<()> {
        let tx_hash = tx.hash();

        if self.contains(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction);
        }

        if self.transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::MempoolFull(self.config.max_transactions));
        }

        let sender_txs = self.by_sender.entry(tx.from()).or_default();
        if sender_txs.len() >= self.config.max_per_account {
            return Err(MempoolError::MempoolFull(self.config.max_per_account));
        }

        sender_txs.push_back(tx_hash);
        self.arrival.push(tx_hash);
        self.transactions.insert(tx_hash, tx);

        Ok(())
    }

    /// Remove up to `limit` transactions in execution order.
    ///
    /// Order follows arrival; a sender's transactions keep their nonce order.
    pub fn drain(&mut self, limit: usize) -> Vec<Transaction> {
        let take = limit.min(self.arrival.len());
        let hashes: Vec<Hash> = self.arrival.drain(..take).collect();

        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(tx) = self.transactions.remove(&hash) {
                let sender = tx.from();
                if let Some(queue) = self.by_sender.get_mut(&sender) {
                    queue.retain(|h| *h != hash);
                    if queue.is_empty() {
                        self.by_sender.remove(&sender);
                    }
                }
                out.push(tx);
            }
        }
        out
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::{hash, ContractCall, Keypair};

    fn revoke(keypair: &Keypair, nonce: u64, gas_price: u64) -> Transaction {
        let call = ContractCall::RevokeConsent {
            consent_id: hash(&nonce.to_le_bytes()),
        };
        Transaction::call(1, nonce, keypair.public_key.clone(), Address::ZERO, &call, gas_price)
            .signed(keypair)
    }

    #[test]
    fn test_mempool_add() {
        let mut mempool = Mempool::new();
        let keypair = Keypair::generate();
        let tx = revoke(&keypair, 0, 1);
        let tx_hash = tx.hash();

        assert!(mempool.add(tx).is_ok());
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&tx_hash));
        assert_eq!(mempool.pending_for(&keypair.address()), 1);
    }

    #[test]
    fn test_mempool_duplicate_rejected() {
        let mut mempool = Mempool::new();
        let keypair = Keypair::generate();
        let tx = revoke(&keypair, 0, 1);

        assert!(mempool.add(tx.clone()).is_ok());
        assert!(matches!(
            mempool.add(tx),
            Err(MempoolError::DuplicateTransaction)
        ));
    }

    #[test]
    fn test_mempool_drain_keeps_sender_order() {
        let mut mempool = Mempool::new();
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        // Gas price does not reorder a sender's queue.
        mempool.add(revoke(&alice, 0, 1)).unwrap();
        mempool.add(revoke(&bob, 0, 9)).unwrap();
        mempool.add(revoke(&alice, 1, 50)).unwrap();

        let drained = mempool.drain(10);
        let alice_nonces: Vec<u64> = drained
            .iter()
            .filter(|tx| tx.from() == alice.address())
            .map(|tx| tx.nonce)
            .collect();
        assert_eq!(alice_nonces, vec![0, 1]);
        assert_eq!(drained.len(), 3);
        assert!(mempool.is_empty());
        assert_eq!(mempool.pending_for(&alice.address()), 0);
    }

    #[test]
    fn test_mempool_drain_limit() {
        let mut mempool = Mempool::new();
        let keypair = Keypair::generate();
        for nonce in 0..3 {
            mempool.add(revoke(&keypair, nonce, 1)).unwrap();
        }
        let first = mempool.drain(2);
        assert_eq!(first.iter().map(|tx| tx.nonce).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(mempool.pending_for(&keypair.address()), 1);
    }

    #[test]
    fn test_mempool_capacity_limit() {
        let config = MempoolConfig {
            max_transactions: 2,
            max_per_account: 10,
        };
        let mut mempool = Mempool::with_config(config);
        let keypair = Keypair::generate();

        assert!(mempool.add(revoke(&keypair, 0, 1)).is_ok());
        assert!(mempool.add(revoke(&keypair, 1, 1)).is_ok());
        assert!(matches!(
            mempool.add(revoke(&keypair, 2, 1)),
            Err(MempoolError::MempoolFull(2))
        ));
    }
}
