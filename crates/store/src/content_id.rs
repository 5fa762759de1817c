//! Content identifiers.
//!
//! Every block is addressed by a CIDv1 over its sha2-256 digest. Leaves use
//! the `raw` codec, DAG nodes that link leaves together use `dag-cbor`.

use crate::error::{Result, StoreError};
use cid::multihash::Multihash;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use steward_core::sha256;

/// Multicodec of a raw leaf block.
pub const RAW: u64 = 0x55;
/// Multicodec of a DAG-CBOR node.
pub const DAG_CBOR: u64 = 0x71;
/// Multihash code of sha2-256.
pub const SHA2_256: u64 = 0x12;

/// A content identifier: a pure function of a block's bytes and codec.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    /// Identifier of a raw leaf block.
    pub fn raw(data: &[u8]) -> Self {
        Self::for_block(RAW, data)
    }

    /// Identifier of a DAG-CBOR node.
    pub fn dag_cbor(data: &[u8]) -> Self {
        Self::for_block(DAG_CBOR, data)
    }

    fn for_block(codec: u64, data: &[u8]) -> Self {
        let digest = sha256(data);
        let mh = Multihash::wrap(SHA2_256, digest.as_bytes())
            .expect("a 32-byte digest always fits a multihash");
        Self(Cid::new_v1(codec, mh))
    }

    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    pub fn is_raw(&self) -> bool {
        self.codec() == RAW
    }

    /// Whether `data` hashes to this identifier.
    pub fn matches(&self, data: &[u8]) -> bool {
        let mh = self.0.hash();
        mh.code() == SHA2_256 && mh.digest() == sha256(data).as_bytes()
    }

    /// Binary form, used as the store key and in archives.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Cid::try_from(bytes)
            .map(Self)
            .map_err(|e| StoreError::InvalidCid(e.to_string()))
    }

    /// Read one binary identifier off the front of a reader.
    pub fn read_from<R: std::io::Read>(reader: R) -> Result<Self> {
        Cid::read_bytes(reader)
            .map(Self)
            .map_err(|e| StoreError::InvalidCid(e.to_string()))
    }

    pub fn as_cid(&self) -> &Cid {
        &self.0
    }
}

impl From<Cid> for ContentId {
    fn from(cid: Cid) -> Self {
        Self(cid)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl FromStr for ContentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Cid::try_from(s.trim())
            .map(Self)
            .map_err(|e| StoreError::InvalidCid(format!("{s}: {e}")))
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            ContentId::from_bytes(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
