//! Content store configuration.

use crate::dag::DEFAULT_BLOCK_SIZE;
use std::path::PathBuf;
use std::time::Duration;

/// Settings passed to [`ContentStore::open`](crate::ContentStore::open).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Repository directory; `None` keeps everything in memory.
    pub repo_path: Option<PathBuf>,
    /// Pin the root of every payload added or imported.
    pub enable_pinning: bool,
    /// Leaf size used when chunking payloads.
    pub block_size: usize,
    /// Bound on establishing a peer connection.
    pub connect_timeout: Duration,
}

impl StoreConfig {
    pub fn at(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            repo_path: None,
            enable_pinning: true,
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
