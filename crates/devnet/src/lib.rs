//! Development ledger for steward.
//!
//! Hosts the ConsentManager, DataRegistry and KeyRecovery contracts in
//! process and serves them through [`steward_core::LedgerRpc`]:
//! - **Mempool**: transactions accepted with the sender's exact next nonce
//! - **Executor**: runs included transactions and produces receipts
//! - **Contracts**: consent, data provenance and guardian recovery state
//! - **Devnet**: block production, clock control and fault injection
//!
//! # Example
//!
//! ```rust,no_run
//! use steward_core::LedgerRpc;
//! use steward_devnet::{Devnet, DevnetConfig, Mining};
//!
//! # async fn run() {
//! let devnet = Devnet::new(DevnetConfig {
//!     mining: Mining::Manual,
//!     ..DevnetConfig::default()
//! });
//! let block = devnet.mine_block();
//! assert_eq!(devnet.block_number().await.unwrap(), block.number);
//! # }
//! ```

pub mod block;
pub mod contracts;
pub mod devnet;
pub mod executor;
pub mod mempool;

pub use block::Block;
pub use contracts::{Contracts, Env, Revert};
pub use devnet::{Devnet, DevnetConfig, Mining};
pub use executor::Executor;
pub use mempool::{Mempool, MempoolConfig, MempoolError};
