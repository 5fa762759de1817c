//! Chunking payloads into a block DAG.
//!
//! Payloads at or below the block size are a single raw block. Larger
//! payloads are cut into raw leaves linked by DAG-CBOR nodes of the form
//! `{"Links": [cid, ...], "Sizes": [u64, ...]}`, where `Sizes[i]` is the
//! payload length under `Links[i]`. Nodes hold at most [`MAX_LINKS`] links;
//! wider layers get another level on top.

use crate::content_id::ContentId;
use crate::error::{Result, StoreError};
use ciborium::value::{Integer, Value};
use std::borrow::Cow;

/// Default leaf size: 256 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Maximum links per DAG node.
pub const MAX_LINKS: usize = 174;

/// CBOR tag for an embedded CID.
const CID_TAG: u64 = 42;

/// An addressed block ready to be written.
#[derive(Debug, Clone)]
pub struct Block<'a> {
    pub cid: ContentId,
    pub data: Cow<'a, [u8]>,
}

/// Blocks of one payload, root last.
#[derive(Debug)]
pub struct Layout<'a> {
    pub root: ContentId,
    pub blocks: Vec<Block<'a>>,
}

/// An interior node linking to its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub links: Vec<ContentId>,
    pub sizes: Vec<u64>,
}

impl DagNode {
    /// Total payload length under this node, as the node itself declares it.
    pub fn payload_size(&self) -> Result<u64> {
        self.sizes
            .iter()
            .try_fold(0u64, |total, size| total.checked_add(*size))
            .ok_or_else(|| StoreError::Dag("payload size overflows".into()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let links = self
            .links
            .iter()
            .map(|cid| {
                // DAG-CBOR prefixes embedded CIDs with the identity multibase byte.
                let mut bytes = vec![0x00];
                bytes.extend_from_slice(&cid.to_bytes());
                Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)))
            })
            .collect();
        let sizes = self
            .sizes
            .iter()
            .map(|s| Value::Integer(Integer::from(*s)))
            .collect();
        let node = Value::Map(vec![
            (Value::Text("Links".into()), Value::Array(links)),
            (Value::Text("Sizes".into()), Value::Array(sizes)),
        ]);

        let mut out = Vec::new();
        ciborium::into_writer(&node, &mut out).expect("serialization should not fail");
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let value: Value =
            ciborium::from_reader(data).map_err(|e| StoreError::Dag(e.to_string()))?;
        let entries = match value {
            Value::Map(entries) => entries,
            _ => return Err(StoreError::Dag("node is not a map".into())),
        };

        let mut links = None;
        let mut sizes = None;
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("Links"), Value::Array(items)) => {
                    links = Some(items.into_iter().map(decode_link).collect::<Result<Vec<_>>>()?);
                }
                (Some("Sizes"), Value::Array(items)) => {
                    sizes = Some(items.into_iter().map(decode_size).collect::<Result<Vec<_>>>()?);
                }
                _ => {}
            }
        }

        let links = links.ok_or_else(|| StoreError::Dag("missing Links".into()))?;
        let sizes = sizes.ok_or_else(|| StoreError::Dag("missing Sizes".into()))?;
        if links.len() != sizes.len() {
            return Err(StoreError::Dag("Links and Sizes differ in length".into()));
        }
        Ok(Self { links, sizes })
    }
}

fn decode_link(value: Value) -> Result<ContentId> {
    match value {
        Value::Tag(CID_TAG, inner) => match *inner {
            Value::Bytes(bytes) if bytes.first() == Some(&0x00) => {
                ContentId::from_bytes(&bytes[1..])
            }
            _ => Err(StoreError::Dag("bad link encoding".into())),
        },
        _ => Err(StoreError::Dag("link is not a CID".into())),
    }
}

fn decode_size(value: Value) -> Result<u64> {
    match value {
        Value::Integer(i) => u64::try_from(i).map_err(|_| StoreError::Dag("bad size".into())),
        _ => Err(StoreError::Dag("size is not an integer".into())),
    }
}

/// Cut `data` into addressed blocks.
pub fn layout(data: &[u8], block_size: usize) -> Layout<'_> {
    let block_size = block_size.max(1);

    if data.len() <= block_size {
        let cid = ContentId::raw(data);
        return Layout {
            root: cid,
            blocks: vec![Block {
                cid,
                data: Cow::Borrowed(data),
            }],
        };
    }

    let mut blocks = Vec::new();
    let mut layer: Vec<(ContentId, u64)> = data
        .chunks(block_size)
        .map(|chunk| {
            let cid = ContentId::raw(chunk);
            blocks.push(Block {
                cid,
                data: Cow::Borrowed(chunk),
            });
            (cid, chunk.len() as u64)
        })
        .collect();

    loop {
        let mut next = Vec::with_capacity(layer.len() / MAX_LINKS + 1);
        for group in layer.chunks(MAX_LINKS) {
            let node = DagNode {
                links: group.iter().map(|(cid, _)| *cid).collect(),
                sizes: group.iter().map(|(_, size)| *size).collect(),
            };
            let encoded = node.encode();
            let cid = ContentId::dag_cbor(&encoded);
            next.push((cid, node.sizes.iter().sum()));
            blocks.push(Block {
                cid,
                data: Cow::Owned(encoded),
            });
        }
        if next.len() == 1 {
            return Layout {
                root: next[0].0,
                blocks,
            };
        }
        layer = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_is_single_raw_block() {
        let data = vec![7u8; 1000];
        let layout = layout(&data, DEFAULT_BLOCK_SIZE);
        assert_eq!(layout.blocks.len(), 1);
        assert!(layout.root.is_raw());
        assert_eq!(layout.root, ContentId::raw(&data));
    }

    #[test]
    fn test_one_mebibyte_is_four_leaves_and_root() {
        let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let layout = layout(&data, DEFAULT_BLOCK_SIZE);
        assert_eq!(layout.blocks.len(), 5);
        assert_eq!(layout.root.codec(), crate::content_id::DAG_CBOR);

        let root = layout.blocks.last().unwrap();
        let node = DagNode::decode(&root.data).unwrap();
        assert_eq!(node.links.len(), 4);
        assert_eq!(node.payload_size().unwrap(), 1024 * 1024);
    }

    #[test]
    fn test_wide_payload_gets_extra_level() {
        let data = vec![1u8; (MAX_LINKS + 1) * 4];
        let layout = layout(&data, 4);
        let root = layout.blocks.last().unwrap();
        let node = DagNode::decode(&root.data).unwrap();
        assert_eq!(node.links.len(), 2);
        assert_eq!(node.payload_size().unwrap(), data.len() as u64);
    }

    #[test]
    fn test_node_encoding_is_stable() {
        let node = DagNode {
            links: vec![ContentId::raw(b"a"), ContentId::raw(b"b")],
            sizes: vec![1, 1],
        };
        assert_eq!(node.encode(), node.encode());
        assert_eq!(DagNode::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn test_overflowing_sizes_are_an_error() {
        let node = DagNode {
            links: vec![ContentId::raw(b"a"), ContentId::raw(b"b")],
            sizes: vec![u64::MAX, 1],
        };
        assert!(matches!(node.payload_size(), Err(StoreError::Dag(_))));
    }

    #[test]
    fn test_decode_rejects_non_map() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&Value::Integer(Integer::from(3u64)), &mut bytes).unwrap();
        assert!(matches!(DagNode::decode(&bytes), Err(StoreError::Dag(_))));
    }
}
