//! Content store errors.

use thiserror::Error;

/// Errors returned by the content store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No local block (or pin) matches the identifier.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid content identifier: {0}")]
    InvalidCid(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Peer {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// A block's bytes do not hash to the identifier they were offered under.
    #[error("Integrity mismatch for {0}")]
    IntegrityMismatch(String),

    #[error("Malformed archive: {0}")]
    Archive(String),

    #[error("Malformed DAG node: {0}")]
    Dag(String),

    #[error("Peer protocol error: {0}")]
    Protocol(String),

    #[error("Node identity error: {0}")]
    Identity(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for content store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
