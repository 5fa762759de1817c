//! Content-addressed block store for steward.
//!
//! Payloads are split into blocks addressed by CIDv1 identifiers and kept
//! in a sled database:
//! - Chunking into a DAG of raw leaves and DAG-CBOR nodes
//! - Idempotent ingestion (identical bytes map to identical blocks)
//! - Advisory pins
//! - Optional AES-256-GCM sealing of payloads at rest
//! - CARv1 archive export and import
//! - A thin peer surface: connect, list, serve and fetch blocks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ContentStore                         │
//! │      add / get / pin / export / connect / fetch          │
//! └───────┬──────────────────┬──────────────────┬───────────┘
//!         │                  │                  │
//! ┌───────▼──────┐  ┌────────▼───────┐  ┌───────▼──────────┐
//! │ dag + archive│  │ Storage (sled) │  │ peer exchange    │
//! │  - chunking  │  │  - block:<cid> │  │  - PeerAddress   │
//! │  - CARv1     │  │  - pin:<cid>   │  │  - NodeIdentity  │
//! │              │  │  - meta:<name> │  │  - Want / Block  │
//! └──────────────┘  └────────────────┘  └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use steward_store::{ContentStore, StoreConfig};
//!
//! let store = ContentStore::open(StoreConfig::at("./repo")).unwrap();
//! let added = store.add(b"raw session bytes").unwrap();
//! assert_eq!(store.get(&added.cid).unwrap(), b"raw session bytes");
//! ```

pub mod archive;
pub mod config;
pub mod content_id;
pub mod crypto;
pub mod dag;
pub mod db;
pub mod error;
pub mod peer;
pub mod store;

// Re-export commonly used types
pub use archive::Archive;
pub use config::StoreConfig;
pub use content_id::ContentId;
pub use crypto::{ContentKey, ENCRYPTION_ALGORITHM};
pub use db::Storage;
pub use error::{Result, StoreError};
pub use peer::{NodeIdentity, PeerAddress};
pub use store::{AddResult, ContentStore, RepoStat};
