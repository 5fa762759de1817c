//! CARv1 archives.
//!
//! Layout: `varint(len) || header || (varint(len) || cid || block)*`, where the
//! header is DAG-CBOR `{"roots": [cid, ...], "version": 1}`.

use crate::content_id::ContentId;
use crate::error::{Result, StoreError};
use ciborium::value::{Integer, Value};

const CID_TAG: u64 = 42;

/// A parsed archive.
#[derive(Debug, Default)]
pub struct Archive {
    pub roots: Vec<ContentId>,
    pub blocks: Vec<(ContentId, Vec<u8>)>,
}

impl Archive {
    pub fn new(roots: Vec<ContentId>) -> Self {
        Self {
            roots,
            blocks: Vec::new(),
        }
    }

    pub fn push(&mut self, cid: ContentId, data: Vec<u8>) {
        self.blocks.push((cid, data));
    }

    pub fn encode(&self) -> Vec<u8> {
        let roots = self
            .roots
            .iter()
            .map(|cid| {
                let mut bytes = vec![0x00];
                bytes.extend_from_slice(&cid.to_bytes());
                Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)))
            })
            .collect();
        let header = Value::Map(vec![
            (Value::Text("roots".into()), Value::Array(roots)),
            (Value::Text("version".into()), Value::Integer(Integer::from(1u64))),
        ]);
        let mut header_bytes = Vec::new();
        ciborium::into_writer(&header, &mut header_bytes).expect("serialization should not fail");

        let mut out = Vec::new();
        write_varint(&mut out, header_bytes.len() as u64);
        out.extend_from_slice(&header_bytes);
        for (cid, data) in &self.blocks {
            let cid_bytes = cid.to_bytes();
            write_varint(&mut out, (cid_bytes.len() + data.len()) as u64);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }
        out
    }

    /// Parse an archive, re-verifying every block against its identifier.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rest = bytes;

        let header_len = read_varint(&mut rest)? as usize;
        if header_len > rest.len() {
            return Err(StoreError::Archive("truncated header".into()));
        }
        let (header, tail) = rest.split_at(header_len);
        rest = tail;
        let roots = decode_header(header)?;

        let mut blocks = Vec::new();
        while !rest.is_empty() {
            let section_len = read_varint(&mut rest)? as usize;
            if section_len > rest.len() {
                return Err(StoreError::Archive("truncated section".into()));
            }
            let (section, tail) = rest.split_at(section_len);
            rest = tail;

            let mut cursor = std::io::Cursor::new(section);
            let cid = ContentId::read_from(&mut cursor)?;
            let data = section[cursor.position() as usize..].to_vec();
            if !cid.matches(&data) {
                return Err(StoreError::IntegrityMismatch(cid.to_string()));
            }
            blocks.push((cid, data));
        }

        Ok(Self { roots, blocks })
    }
}

fn decode_header(header: &[u8]) -> Result<Vec<ContentId>> {
    let value: Value =
        ciborium::from_reader(header).map_err(|e| StoreError::Archive(e.to_string()))?;
    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(StoreError::Archive("header is not a map".into())),
    };

    let mut roots = None;
    let mut version = None;
    for (key, value) in entries {
        match (key.as_text(), value) {
            (Some("roots"), Value::Array(items)) => {
                let mut cids = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Tag(CID_TAG, inner) => match *inner {
                            Value::Bytes(b) if b.first() == Some(&0x00) => {
                                cids.push(ContentId::from_bytes(&b[1..])?)
                            }
                            _ => return Err(StoreError::Archive("bad root encoding".into())),
                        },
                        _ => return Err(StoreError::Archive("root is not a CID".into())),
                    }
                }
                roots = Some(cids);
            }
            (Some("version"), Value::Integer(v)) => version = u64::try_from(v).ok(),
            _ => {}
        }
    }

    if version != Some(1) {
        return Err(StoreError::Archive("unsupported version".into()));
    }
    roots.ok_or_else(|| StoreError::Archive("missing roots".into()))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(input: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, byte) in input.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Ok(value);
        }
    }
    Err(StoreError::Archive("bad varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint() {
        for value in [0u64, 1, 127, 128, 300, 1 << 20] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut slice = &buf[..];
            assert_eq!(read_varint(&mut slice).unwrap(), value);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_archive_reparses_to_same_roots() {
        let data = b"eeg session".to_vec();
        let cid = ContentId::raw(&data);
        let mut archive = Archive::new(vec![cid]);
        archive.push(cid, data.clone());

        let parsed = Archive::decode(&archive.encode()).unwrap();
        assert_eq!(parsed.roots, vec![cid]);
        assert_eq!(parsed.blocks, vec![(cid, data)]);
    }

    #[test]
    fn test_tampered_block_is_rejected() {
        let cid = ContentId::raw(b"original");
        let mut archive = Archive::new(vec![cid]);
        archive.push(cid, b"tampered".to_vec());

        assert!(matches!(
            Archive::decode(&archive.encode()),
            Err(StoreError::IntegrityMismatch(_))
        ));
    }

    #[test]
    fn test_truncated_archive_is_rejected() {
        let cid = ContentId::raw(b"x");
        let mut archive = Archive::new(vec![cid]);
        archive.push(cid, b"x".to_vec());
        let bytes = archive.encode();
        assert!(Archive::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
