//! The development ledger.
//!
//! An in-process [`LedgerRpc`] implementation that validates, queues, mines
//! and executes transactions against the three contracts. It backs
//! `steward-node` and stands in for a real ledger in tests, where its fault
//! injection knobs exercise the client's failure paths.

use crate::block::Block;
use crate::contracts::Contracts;
use crate::executor::Executor;
use crate::mempool::{Mempool, MempoolError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use steward_core::{
    revert, Address, ContractAddresses, ContractQuery, Hash, LedgerRpc, Receipt, RpcError,
    Transaction,
};
use tracing::{debug, info};

/// When broadcast transactions get included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mining {
    /// Every accepted transaction is mined into its own block right away.
    Instant,
    /// Transactions wait in the mempool until [`Devnet::mine_block`].
    Manual,
}

/// Development ledger configuration.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub chain_id: u64,
    /// Quoted gas price; lower-priced transactions are rejected.
    pub gas_price: u64,
    /// Approvals a recovery request needs to become actionable.
    pub recovery_threshold: u64,
    pub mining: Mining,
    /// Account the contracts are deployed from.
    pub deployer: Address,
    /// Transactions per mined block.
    pub max_block_size: usize,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            gas_price: 1,
            recovery_threshold: 3,
            mining: Mining::Instant,
            deployer: Address::ZERO,
            max_block_size: 1000,
        }
    }
}

struct Inner {
    config: DevnetConfig,
    blocks: Vec<Block>,
    mempool: Mempool,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<Hash, Receipt>,
    contracts: Contracts,
    /// Seconds added to the wall clock.
    time_offset: u64,
    fail_fee_quote: bool,
    offline: bool,
}

impl Inner {
    fn now(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        wall + self.time_offset
    }

    fn head(&self) -> &Block {
        // Genesis is pushed at construction, so there is always a head.
        &self.blocks[self.blocks.len() - 1]
    }

    fn pending_nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0) + self.mempool.pending_for(address)
    }

    fn check_online(&self) -> Result<(), RpcError> {
        if self.offline {
            return Err(RpcError::Connection("ledger node is offline".into()));
        }
        Ok(())
    }

    fn admit(&mut self, tx: &Transaction) -> Result<Hash, RpcError> {
        tx.verify_for_chain(self.config.chain_id)
            .map_err(|e| RpcError::Rejected(e.to_string()))?;

        let expected = self.pending_nonce(&tx.from());
        if tx.nonce != expected {
            return Err(RpcError::Rejected(format!(
                "invalid nonce: expected {expected}, got {}",
                tx.nonce
            )));
        }
        if tx.gas_price < self.config.gas_price {
            return Err(RpcError::Rejected(format!(
                "gas price {} below quote {}",
                tx.gas_price, self.config.gas_price
            )));
        }
        if tx.gas_limit < tx.intrinsic_gas() {
            return Err(RpcError::Rejected(format!(
                "intrinsic gas too low: limit {}, need {}",
                tx.gas_limit,
                tx.intrinsic_gas()
            )));
        }

        let tx_hash = tx.hash();
        self.mempool.add(tx.clone()).map_err(|e| match e {
            MempoolError::DuplicateTransaction => RpcError::Rejected("already known".into()),
            other => RpcError::Rejected(other.to_string()),
        })?;
        debug!(tx = %tx_hash, from = %tx.from(), nonce = tx.nonce, "Accepted transaction");
        Ok(tx_hash)
    }

    fn mine(&mut self) -> Block {
        let transactions = self.mempool.drain(self.config.max_block_size);
        let number = self.head().number + 1;
        let timestamp = self.now().max(self.head().timestamp);

        let mut executor = Executor::new(&mut self.contracts, &mut self.nonces);
        let mut hashes = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let receipt = executor.execute_transaction(tx, number, timestamp);
            hashes.push(receipt.tx_hash);
            self.receipts.insert(receipt.tx_hash, receipt);
        }

        let block = Block::next(self.head(), timestamp, hashes);
        info!(number = block.number, txs = block.transactions.len(), "Mined block");
        self.blocks.push(block.clone());
        block
    }
}

/// In-process development ledger.
pub struct Devnet {
    addresses: ContractAddresses,
    inner: Mutex<Inner>,
}

impl Devnet {
    pub fn new(config: DevnetConfig) -> Self {
        let addresses = ContractAddresses::deployed_by(&config.deployer);
        let contracts = Contracts::new(addresses, config.recovery_threshold);
        let mut inner = Inner {
            config,
            blocks: Vec::new(),
            mempool: Mempool::new(),
            nonces: HashMap::new(),
            receipts: HashMap::new(),
            contracts,
            time_offset: 0,
            fail_fee_quote: false,
            offline: false,
        };
        let genesis = Block::genesis(inner.now());
        inner.blocks.push(genesis);

        info!(
            consent_manager = %addresses.consent_manager,
            data_registry = %addresses.data_registry,
            key_recovery = %addresses.key_recovery,
            "Deployed contracts"
        );
        Self {
            addresses,
            inner: Mutex::new(inner),
        }
    }

    /// Where the three contracts live.
    pub fn addresses(&self) -> ContractAddresses {
        self.addresses
    }

    pub fn config(&self) -> DevnetConfig {
        self.lock().config.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation completes under the lock, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mine the pending transactions into a new block (empty if none).
    pub fn mine_block(&self) -> Block {
        self.lock().mine()
    }

    pub fn set_mining(&self, mining: Mining) {
        self.lock().config.mining = mining;
    }

    /// Move the ledger clock forward.
    pub fn advance_time(&self, secs: u64) {
        self.lock().time_offset += secs;
    }

    /// Current ledger time.
    pub fn now(&self) -> u64 {
        self.lock().now()
    }

    /// Make `gas_price` fail until reset.
    pub fn fail_fee_quote(&self, fail: bool) {
        self.lock().fail_fee_quote = fail;
    }

    /// Make every RPC fail with a connection error until reset.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn pending_count(&self) -> usize {
        self.lock().mempool.len()
    }

    pub fn latest_block(&self) -> Block {
        self.lock().head().clone()
    }

    pub fn block(&self, number: u64) -> Option<Block> {
        self.lock().blocks.get(number as usize).cloned()
    }
}

impl Default for Devnet {
    fn default() -> Self {
        Self::new(DevnetConfig::default())
    }
}

#[async_trait]
impl LedgerRpc for Devnet {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.config.chain_id)
    }

    async fn gas_price(&self) -> Result<u64, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        if inner.fail_fee_quote {
            return Err(RpcError::Connection("fee oracle unavailable".into()));
        }
        Ok(inner.config.gas_price)
    }

    async fn pending_nonce(&self, address: &Address) -> Result<u64, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.pending_nonce(address))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash, RpcError> {
        let mut inner = self.lock();
        inner.check_online()?;
        let tx_hash = inner.admit(tx)?;
        if inner.config.mining == Mining::Instant {
            inner.mine();
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.receipts.get(tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.head().number)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let inner = self.lock();
        inner.check_online()?;
        let query = ContractQuery::decode(data)
            .map_err(|_| RpcError::Reverted(revert::MALFORMED_CALLDATA.to_string()))?;
        inner
            .contracts
            .query(to, &query, inner.now())
            .map_err(|reason| RpcError::Reverted(reason.to_string()))
    }
}
