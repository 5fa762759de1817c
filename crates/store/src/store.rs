//! The content store.

use crate::archive::Archive;
use crate::config::StoreConfig;
use crate::content_id::{ContentId, DAG_CBOR, RAW};
use crate::crypto::{self, ContentKey};
use crate::dag::{self, DagNode};
use crate::db::Storage;
use crate::error::{Result, StoreError};
use crate::peer::{self, NodeIdentity, PeerAddress, PeerConnection};
use libp2p::{Multiaddr, PeerId};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use steward_core::{sha256, Hash};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of adding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResult {
    pub cid: ContentId,
    /// Payload length in bytes.
    pub size: u64,
    /// Distinct blocks making up the payload.
    pub block_count: usize,
    /// sha256 of the whole payload, the digest registered on the ledger.
    pub digest: Hash,
    /// The root was already stored before this call.
    pub already_present: bool,
}

/// Blocks of a graph that are checked but not yet written.
type Pending = HashMap<ContentId, Vec<u8>>;

/// Repository totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoStat {
    pub blocks: u64,
    /// Bytes held in blocks, each distinct block counted once.
    pub stored_bytes: u64,
    pub pinned: u64,
}

/// Content-addressed block store with pins, archives and peer exchange.
///
/// Every method takes `&self`; a store can be shared across tasks behind an
/// `Arc`. Blocks are immutable once written, so concurrent adds of the same
/// payload race harmlessly.
pub struct ContentStore {
    storage: Storage,
    config: StoreConfig,
    identity: NodeIdentity,
    peers: Mutex<HashMap<PeerId, Arc<PeerConnection>>>,
}

impl ContentStore {
    /// Open the repository named by `config` (in memory if it names none).
    pub fn open(config: StoreConfig) -> Result<Self> {
        let storage = match &config.repo_path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Storage::open(path)?
            }
            None => Storage::open_temporary()?,
        };
        let identity = NodeIdentity::load_or_generate(&storage)?;
        debug!(peer_id = %identity.peer_id(), repo = ?config.repo_path, "Opened content store");
        Ok(Self {
            storage,
            config,
            identity,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Ingest a payload. Re-adding identical bytes yields the same identifier
    /// and writes nothing new.
    pub fn add(&self, data: &[u8]) -> Result<AddResult> {
        let layout = dag::layout(data, self.config.block_size);
        let root = layout.root;
        let already_present = self.has_block(&root)?;

        let mut seen = HashSet::new();
        let mut written = 0usize;
        for block in &layout.blocks {
            if !seen.insert(block.cid) {
                continue;
            }
            if self
                .storage
                .put_raw_if_absent(Storage::block_key(&block.cid.to_bytes()), &block.data)?
            {
                written += 1;
            }
        }

        if self.config.enable_pinning {
            self.storage
                .put(Storage::pin_key(&root.to_bytes()), &(data.len() as u64))?;
        }

        info!(
            cid = %root,
            size = data.len(),
            blocks = seen.len(),
            new_blocks = written,
            "Added content"
        );

        Ok(AddResult {
            cid: root,
            size: data.len() as u64,
            block_count: seen.len(),
            digest: sha256(data),
            already_present,
        })
    }

    /// Read a whole file into memory and add it.
    pub fn add_file<P: AsRef<Path>>(&self, path: P) -> Result<AddResult> {
        let data = std::fs::read(path)?;
        self.add(&data)
    }

    /// Reassemble the payload under `cid` from local blocks.
    pub fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_into(cid, &mut out)?;
        Ok(out)
    }

    /// Seal `data` with AES-256-GCM and add the sealed bytes. The nonce is
    /// random, so unlike [`add`](Self::add) two calls yield different
    /// identifiers; size and digest describe the stored ciphertext.
    pub fn add_encrypted(&self, data: &[u8], key: &ContentKey) -> Result<AddResult> {
        let sealed = crypto::seal(key, data)?;
        debug!(plaintext = data.len(), sealed = sealed.len(), "Sealed payload");
        self.add(&sealed)
    }

    pub fn add_file_encrypted<P: AsRef<Path>>(&self, path: P, key: &ContentKey) -> Result<AddResult> {
        let data = std::fs::read(path)?;
        self.add_encrypted(&data, key)
    }

    /// Reassemble a sealed payload and decrypt it.
    pub fn get_decrypted(&self, cid: &ContentId, key: &ContentKey) -> Result<Vec<u8>> {
        crypto::open(key, &self.get(cid)?)
    }

    fn read_into(&self, cid: &ContentId, out: &mut Vec<u8>) -> Result<()> {
        let block = self.block(cid)?;
        match cid.codec() {
            RAW => out.extend_from_slice(&block),
            DAG_CBOR => {
                let node = DagNode::decode(&block)?;
                for link in &node.links {
                    self.read_into(link, out)?;
                }
            }
            other => return Err(StoreError::InvalidCid(format!("{cid}: unsupported codec {other:#x}"))),
        }
        Ok(())
    }

    /// Raw bytes of one block.
    pub fn block(&self, cid: &ContentId) -> Result<Vec<u8>> {
        self.storage
            .get_raw(Storage::block_key(&cid.to_bytes()))?
            .ok_or_else(|| StoreError::NotFound(cid.to_string()))
    }

    pub fn has_block(&self, cid: &ContentId) -> Result<bool> {
        self.storage.contains(Storage::block_key(&cid.to_bytes()))
    }

    /// Payload length under `cid`, read from its root block alone.
    fn payload_size(&self, cid: &ContentId) -> Result<u64> {
        let block = self.block(cid)?;
        if cid.codec() == DAG_CBOR {
            DagNode::decode(&block)?.payload_size()
        } else {
            Ok(block.len() as u64)
        }
    }

    fn lookup<'a>(&self, cid: &ContentId, pending: &'a Pending) -> Result<Cow<'a, [u8]>> {
        match pending.get(cid) {
            Some(data) => Ok(Cow::Borrowed(data)),
            None => self.block(cid).map(Cow::Owned),
        }
    }

    /// Payload size under `root`, walking `pending` and local blocks.
    ///
    /// Fails with [`StoreError::Dag`] unless every node's `Sizes[i]` equals
    /// the payload actually held under `Links[i]`, and with `NotFound` when a
    /// block is missing. `sizes` memoizes shared subgraphs.
    fn verified_size(
        &self,
        root: &ContentId,
        pending: &Pending,
        sizes: &mut HashMap<ContentId, u64>,
    ) -> Result<u64> {
        if let Some(size) = sizes.get(root) {
            return Ok(*size);
        }
        let data = self.lookup(root, pending)?;
        let size = match root.codec() {
            RAW => data.len() as u64,
            DAG_CBOR => {
                let node = DagNode::decode(&data)?;
                let mut total = 0u64;
                for (link, declared) in node.links.iter().zip(&node.sizes) {
                    let actual = self.verified_size(link, pending, sizes)?;
                    if actual != *declared {
                        return Err(StoreError::Dag(format!(
                            "{root}: link {link} declares {declared} bytes but holds {actual}"
                        )));
                    }
                    total = total
                        .checked_add(actual)
                        .ok_or_else(|| StoreError::Dag("payload size overflows".into()))?;
                }
                total
            }
            other => {
                return Err(StoreError::InvalidCid(format!(
                    "{root}: unsupported codec {other:#x}"
                )))
            }
        };
        sizes.insert(*root, size);
        Ok(size)
    }

    /// Write checked blocks; returns how many were new.
    fn commit(&self, pending: &Pending) -> Result<usize> {
        let mut written = 0;
        for (cid, data) in pending {
            if self
                .storage
                .put_raw_if_absent(Storage::block_key(&cid.to_bytes()), data)?
            {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Every block reachable from `root`, root first, each once.
    fn closure(&self, root: &ContentId) -> Result<Vec<(ContentId, Vec<u8>)>> {
        let mut seen = HashSet::new();
        let mut stack = vec![*root];
        let mut out = Vec::new();
        while let Some(cid) = stack.pop() {
            if !seen.insert(cid) {
                continue;
            }
            let data = self.block(&cid)?;
            if cid.codec() == DAG_CBOR {
                let node = DagNode::decode(&data)?;
                stack.extend(node.links.iter().rev());
            }
            out.push((cid, data));
        }
        Ok(out)
    }

    // =========================================================================
    // Pins
    // =========================================================================

    /// Mark `cid` as protected from garbage collection.
    pub fn pin(&self, cid: &ContentId) -> Result<()> {
        let size = self.payload_size(cid)?;
        self.put_pin(cid, size)
    }

    fn put_pin(&self, cid: &ContentId, size: u64) -> Result<()> {
        self.storage.put(Storage::pin_key(&cid.to_bytes()), &size)?;
        info!(%cid, size, "Pinned");
        Ok(())
    }

    /// Remove a pin. Returns whether one existed; the blocks stay.
    pub fn unpin(&self, cid: &ContentId) -> Result<bool> {
        let removed = self.storage.delete(Storage::pin_key(&cid.to_bytes()))?;
        if removed {
            info!(%cid, "Unpinned");
        }
        Ok(removed)
    }

    pub fn is_pinned(&self, cid: &ContentId) -> Result<bool> {
        self.storage.contains(Storage::pin_key(&cid.to_bytes()))
    }

    /// Pinned roots with their payload sizes.
    pub fn pins(&self) -> Result<Vec<(ContentId, u64)>> {
        self.storage
            .scan::<u64>(Storage::PIN_PREFIX)?
            .into_iter()
            .map(|(key, size)| Ok((ContentId::from_bytes(&key)?, size)))
            .collect()
    }

    pub fn stat(&self) -> Result<RepoStat> {
        let blocks = self.storage.scan_lengths(Storage::BLOCK_PREFIX)?;
        let pinned = self.storage.scan_lengths(Storage::PIN_PREFIX)?.len();
        Ok(RepoStat {
            blocks: blocks.len() as u64,
            stored_bytes: blocks.iter().map(|(_, len)| *len as u64).sum(),
            pinned: pinned as u64,
        })
    }

    // =========================================================================
    // Archives
    // =========================================================================

    /// Serialize `cid` and every block it references into a CARv1 archive.
    pub fn export_archive(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let mut archive = Archive::new(vec![*cid]);
        for (block_cid, data) in self.closure(cid)? {
            archive.push(block_cid, data);
        }
        debug!(%cid, blocks = archive.blocks.len(), "Exported archive");
        Ok(archive.encode())
    }

    /// Load every block of a CARv1 archive and return its roots.
    ///
    /// Each root's graph must be complete, from the archive plus local
    /// blocks, and its node sizes must be consistent. Nothing is written
    /// otherwise.
    pub fn import_archive(&self, bytes: &[u8]) -> Result<Vec<ContentId>> {
        let archive = Archive::decode(bytes)?;
        let pending: Pending = archive.blocks.into_iter().collect();

        let mut sizes = HashMap::new();
        let mut root_sizes = Vec::with_capacity(archive.roots.len());
        for root in &archive.roots {
            root_sizes.push(self.verified_size(root, &pending, &mut sizes)?);
        }

        let written = self.commit(&pending)?;
        if self.config.enable_pinning {
            for (root, size) in archive.roots.iter().zip(root_sizes) {
                self.put_pin(root, size)?;
            }
        }
        info!(
            roots = archive.roots.len(),
            blocks = pending.len(),
            new_blocks = written,
            "Imported archive"
        );
        Ok(archive.roots)
    }

    // =========================================================================
    // Peers
    // =========================================================================

    /// Connect to the peer at `address`.
    pub async fn connect_to_peer(&self, address: &str, cancel: &CancellationToken) -> Result<PeerId> {
        let address = PeerAddress::parse(address)?;
        let conn = PeerConnection::dial(
            address,
            self.peer_id(),
            self.config.connect_timeout,
            cancel,
        )
        .await?;
        let peer_id = conn.peer_id();
        self.lock_peers().insert(peer_id, Arc::new(conn));
        Ok(peer_id)
    }

    /// Addresses of the currently connected peers.
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.lock_peers()
            .values()
            .map(|conn| conn.address.clone())
            .collect()
    }

    pub fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.lock_peers().remove(peer_id).is_some()
    }

    /// Serve local blocks to peers on `addr` until `cancel` fires.
    pub async fn listen(&self, addr: &str, cancel: CancellationToken) -> Result<Multiaddr> {
        let addr: Multiaddr = addr
            .parse()
            .map_err(|e| StoreError::InvalidAddress(format!("{addr}: {e}")))?;
        peer::listen(&addr, self.storage.clone(), self.peer_id(), cancel).await
    }

    /// Pull the block graph under `cid` from connected peers into the local
    /// store. Blocks already held locally are not requested again.
    ///
    /// Fetched blocks are held back until the whole graph is present and its
    /// node sizes check out. Returns the number of blocks fetched.
    pub async fn fetch(&self, cid: &ContentId, cancel: &CancellationToken) -> Result<usize> {
        let mut pending = Pending::new();
        let mut seen = HashSet::new();
        let mut stack = vec![*cid];

        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let (data, fresh) = if self.has_block(&next)? {
                (self.block(&next)?, false)
            } else {
                let data = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    res = self.want_from_peers(next) => res?,
                };
                (data, true)
            };
            if next.codec() == DAG_CBOR {
                stack.extend(DagNode::decode(&data)?.links);
            }
            if fresh {
                pending.insert(next, data);
            }
        }

        self.verified_size(cid, &pending, &mut HashMap::new())?;
        self.commit(&pending)?;
        let fetched = pending.len();
        info!(%cid, fetched, "Fetched from peers");
        Ok(fetched)
    }

    async fn want_from_peers(&self, cid: ContentId) -> Result<Vec<u8>> {
        let peers: Vec<Arc<PeerConnection>> = self.lock_peers().values().cloned().collect();
        for conn in peers {
            match conn.want(cid).await {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => continue,
                Err(e) => {
                    warn!(peer = %conn.address, %cid, error = %e, "Block request failed");
                    if matches!(e, StoreError::Unreachable { .. } | StoreError::Io(_)) {
                        self.disconnect(&conn.peer_id());
                    }
                }
            }
        }
        Err(StoreError::NotFound(cid.to_string()))
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, Arc<PeerConnection>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}
