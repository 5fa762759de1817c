//! sled database wrapper with serialization helpers.

use crate::error::Result;
use sled::Db;
use std::path::Path;

/// Wrapper around sled database with serialization helpers.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Insert raw bytes unless the key already exists.
    ///
    /// Returns `true` if this call wrote the value. Racing writers of the
    /// same key see exactly one `true`.
    pub fn put_raw_if_absent<K: AsRef<[u8]>>(&self, key: K, value: &[u8]) -> Result<bool> {
        let outcome = self
            .db
            .compare_and_swap(key, None::<&[u8]>, Some(value))?;
        Ok(outcome.is_ok())
    }

    /// Retrieve raw bytes.
    pub fn get_raw<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Delete a key, returning whether it existed.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.remove(key)?.is_some())
    }

    /// Check if a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Iterate `(key suffix, value length)` for every key under `prefix`.
    pub fn scan_lengths(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, usize)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            out.push((key[prefix.len()..].to_vec(), value.len()));
        }
        Ok(out)
    }

    /// Iterate `(key suffix, decoded value)` for every key under `prefix`.
    pub fn scan<V: serde::de::DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            out.push((key[prefix.len()..].to_vec(), bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Prefix shared by all block keys.
    pub const BLOCK_PREFIX: &'static [u8] = b"block:";

    /// Prefix shared by all pin keys.
    pub const PIN_PREFIX: &'static [u8] = b"pin:";

    /// Format: "block:" + cid_bytes
    pub fn block_key(cid: &[u8]) -> Vec<u8> {
        let mut key = Self::BLOCK_PREFIX.to_vec();
        key.extend_from_slice(cid);
        key
    }

    /// Format: "pin:" + cid_bytes
    pub fn pin_key(cid: &[u8]) -> Vec<u8> {
        let mut key = Self::PIN_PREFIX.to_vec();
        key.extend_from_slice(cid);
        key
    }

    /// Format: "meta:{name}"
    pub fn meta_key(name: &str) -> Vec<u8> {
        format!("meta:{}", name).into_bytes()
    }
}
