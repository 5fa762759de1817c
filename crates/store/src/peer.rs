//! Peer addresses, node identity and the block exchange protocol.
//!
//! Peers talk over TCP with length-delimited bincode frames. The dialer opens
//! with `Hello`, the listener answers with its own `Hello`, and from then on
//! the dialer sends `Want` and receives `Block` or `DontHave`.

use crate::content_id::ContentId;
use crate::db::Storage;
use crate::error::{Result, StoreError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use libp2p::identity;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A dialable peer: `/ip4|ip6|dns|dns4|dns6/<host>/tcp/<port>/p2p/<peer-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub peer_id: PeerId,
    /// Transport part of the address, without `/p2p`.
    pub transport: Multiaddr,
}

impl PeerAddress {
    pub fn parse(s: &str) -> Result<Self> {
        let addr: Multiaddr = s
            .trim()
            .parse()
            .map_err(|e| StoreError::InvalidAddress(format!("{s}: {e}")))?;

        let peer_id = addr
            .iter()
            .find_map(|p| match p {
                Protocol::P2p(peer_id) => Some(peer_id),
                _ => None,
            })
            .ok_or_else(|| StoreError::InvalidAddress(format!("{s}: missing /p2p/<peer-id>")))?;

        let transport: Multiaddr = addr
            .iter()
            .filter(|p| !matches!(p, Protocol::P2p(_)))
            .collect();
        // Reject anything we cannot dial up front.
        socket_target(&transport)?;

        Ok(Self { peer_id, transport })
    }

    /// `host:port` to hand to the TCP connector.
    pub fn dial_target(&self) -> Result<String> {
        socket_target(&self.transport)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.transport, self.peer_id)
    }
}

/// Turn a transport multiaddr into a `host:port` string.
pub fn socket_target(addr: &Multiaddr) -> Result<String> {
    let mut host = None;
    let mut port = None;
    for p in addr.iter() {
        match p {
            Protocol::Ip4(ip) => host = Some(ip.to_string()),
            Protocol::Ip6(ip) => host = Some(format!("[{ip}]")),
            Protocol::Dns(h) | Protocol::Dns4(h) | Protocol::Dns6(h) => host = Some(h.to_string()),
            Protocol::Tcp(p) => port = Some(p),
            other => {
                return Err(StoreError::InvalidAddress(format!(
                    "{addr}: unsupported protocol {other}"
                )))
            }
        }
    }
    match (host, port) {
        (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
        _ => Err(StoreError::InvalidAddress(format!(
            "{addr}: expected host and /tcp/<port>"
        ))),
    }
}

fn multiaddr_for(socket: SocketAddr, peer_id: PeerId) -> Multiaddr {
    let mut addr = Multiaddr::empty();
    match socket {
        SocketAddr::V4(v4) => addr.push(Protocol::Ip4(*v4.ip())),
        SocketAddr::V6(v6) => addr.push(Protocol::Ip6(*v6.ip())),
    }
    addr.push(Protocol::Tcp(socket.port()));
    addr.push(Protocol::P2p(peer_id));
    addr
}

/// The node's ed25519 identity, persisted in the repository.
#[derive(Clone)]
pub struct NodeIdentity {
    keypair: identity::Keypair,
}

impl NodeIdentity {
    const KEY_NAME: &'static str = "node_key";

    /// Load the identity stored in `storage`, or generate and persist one.
    pub fn load_or_generate(storage: &Storage) -> Result<Self> {
        let key = Storage::meta_key(Self::KEY_NAME);
        if let Some(bytes) = storage.get_raw(&key)? {
            let keypair = identity::Keypair::from_protobuf_encoding(&bytes)
                .map_err(|e| StoreError::Identity(e.to_string()))?;
            debug!("Loaded existing node identity");
            return Ok(Self { keypair });
        }

        let keypair = identity::Keypair::generate_ed25519();
        let bytes = keypair
            .to_protobuf_encoding()
            .map_err(|e| StoreError::Identity(e.to_string()))?;
        if !storage.put_raw_if_absent(&key, &bytes)? {
            // Another opener won the race; use its key.
            return Self::load_or_generate(storage);
        }
        info!(peer_id = %keypair.public().to_peer_id(), "Generated new node identity");
        Ok(Self { keypair })
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.public().to_peer_id()
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id())
            .finish()
    }
}

/// A frame of the exchange protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Hello { peer_id: Vec<u8> },
    Want { cid: ContentId },
    Block { cid: ContentId, data: Vec<u8> },
    DontHave { cid: ContentId },
}

impl Message {
    fn encode(&self) -> Bytes {
        Bytes::from(bincode::serialize(self).expect("serialization should not fail"))
    }

    fn decode(frame: &[u8]) -> Result<Self> {
        bincode::deserialize(frame).map_err(|e| StoreError::Protocol(e.to_string()))
    }

    fn hello(peer_id: PeerId) -> Self {
        Message::Hello {
            peer_id: peer_id.to_bytes(),
        }
    }
}

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

async fn send(transport: &mut Transport, msg: &Message) -> Result<()> {
    transport.send(msg.encode()).await?;
    Ok(())
}

async fn recv(transport: &mut Transport) -> Result<Option<Message>> {
    match transport.next().await {
        Some(frame) => Ok(Some(Message::decode(&frame?)?)),
        None => Ok(None),
    }
}

async fn handshake(address: &PeerAddress, local: PeerId) -> Result<Transport> {
    let unreachable = |reason: String| StoreError::Unreachable {
        address: address.to_string(),
        reason,
    };

    let stream = TcpStream::connect(address.dial_target()?)
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
    send(&mut transport, &Message::hello(local)).await?;

    match recv(&mut transport).await? {
        Some(Message::Hello { peer_id }) => {
            let remote =
                PeerId::from_bytes(&peer_id).map_err(|e| StoreError::Protocol(e.to_string()))?;
            if remote != address.peer_id {
                return Err(unreachable(format!("peer identified as {remote}")));
            }
            Ok(transport)
        }
        Some(other) => Err(StoreError::Protocol(format!(
            "expected Hello, got {other:?}"
        ))),
        None => Err(unreachable("connection closed during handshake".into())),
    }
}

/// An established outbound connection.
#[derive(Debug)]
pub struct PeerConnection {
    pub address: PeerAddress,
    transport: Mutex<Transport>,
}

impl PeerConnection {
    /// Dial `address`, bounded by `timeout` and `cancel`.
    pub async fn dial(
        address: PeerAddress,
        local: PeerId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            res = tokio::time::timeout(timeout, handshake(&address, local)) => match res {
                Ok(res) => res?,
                Err(_) => {
                    return Err(StoreError::Unreachable {
                        address: address.to_string(),
                        reason: format!("no answer within {timeout:?}"),
                    })
                }
            },
        };

        info!(peer = %address, "Connected to peer");
        Ok(Self {
            address,
            transport: Mutex::new(transport),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.address.peer_id
    }

    /// Ask the peer for one block. `None` if the peer does not have it.
    pub async fn want(&self, cid: ContentId) -> Result<Option<Vec<u8>>> {
        let mut transport = self.transport.lock().await;
        send(&mut transport, &Message::Want { cid }).await?;
        match recv(&mut transport).await? {
            Some(Message::Block { cid: got, data }) if got == cid => {
                if !cid.matches(&data) {
                    return Err(StoreError::IntegrityMismatch(cid.to_string()));
                }
                Ok(Some(data))
            }
            Some(Message::DontHave { cid: got }) if got == cid => Ok(None),
            Some(other) => Err(StoreError::Protocol(format!(
                "unexpected answer to Want({cid}): {other:?}"
            ))),
            None => Err(StoreError::Unreachable {
                address: self.address.to_string(),
                reason: "connection closed".into(),
            }),
        }
    }
}

/// Bind `addr` and serve blocks from `storage` until `cancel` fires.
///
/// Returns the bound address including `/p2p/<peer-id>`.
pub async fn listen(
    addr: &Multiaddr,
    storage: Storage,
    local: PeerId,
    cancel: CancellationToken,
) -> Result<Multiaddr> {
    let target = socket_target(addr)?;
    let listener = TcpListener::bind(&target).await?;
    let bound = multiaddr_for(listener.local_addr()?, local);
    info!(addr = %bound, "Listening for peers");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let storage = storage.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, storage, local, cancel).await {
                                warn!(%remote, error = %e, "Peer session ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
        debug!("Peer listener stopped");
    });

    Ok(bound)
}

async fn serve(
    stream: TcpStream,
    storage: Storage,
    local: PeerId,
    cancel: CancellationToken,
) -> Result<()> {
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let remote = match recv(&mut transport).await? {
        Some(Message::Hello { peer_id }) => {
            PeerId::from_bytes(&peer_id).map_err(|e| StoreError::Protocol(e.to_string()))?
        }
        Some(other) => return Err(StoreError::Protocol(format!("expected Hello, got {other:?}"))),
        None => return Ok(()),
    };
    send(&mut transport, &Message::hello(local)).await?;
    debug!(peer = %remote, "Peer session open");

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = recv(&mut transport) => msg?,
        };
        let reply = match msg {
            Some(Message::Want { cid }) => match storage.get_raw(Storage::block_key(&cid.to_bytes()))? {
                Some(data) => {
                    debug!(peer = %remote, %cid, "Serving block");
                    Message::Block { cid, data }
                }
                None => Message::DontHave { cid },
            },
            Some(other) => {
                return Err(StoreError::Protocol(format!("unexpected message {other:?}")))
            }
            None => return Ok(()),
        };
        send(&mut transport, &reply).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_peer() -> PeerId {
        identity::Keypair::generate_ed25519().public().to_peer_id()
    }

    #[test]
    fn test_parse_full_address() {
        let peer = some_peer();
        let addr = PeerAddress::parse(&format!("/ip4/10.0.0.5/tcp/4001/p2p/{peer}")).unwrap();
        assert_eq!(addr.peer_id, peer);
        assert_eq!(addr.dial_target().unwrap(), "10.0.0.5:4001");
        assert_eq!(addr.to_string(), format!("/ip4/10.0.0.5/tcp/4001/p2p/{peer}"));
    }

    #[test]
    fn test_parse_dns_and_ip6() {
        let peer = some_peer();
        let dns = PeerAddress::parse(&format!("/dns4/store.local/tcp/4001/p2p/{peer}")).unwrap();
        assert_eq!(dns.dial_target().unwrap(), "store.local:4001");
        let v6 = PeerAddress::parse(&format!("/ip6/::1/tcp/9/p2p/{peer}")).unwrap();
        assert_eq!(v6.dial_target().unwrap(), "[::1]:9");
    }

    #[test]
    fn test_malformed_addresses() {
        let peer = some_peer();
        for bad in [
            "not an address".to_string(),
            "/ip4/10.0.0.5/tcp/4001".to_string(),
            format!("/ip4/10.0.0.5/p2p/{peer}"),
            format!("/ip4/10.0.0.5/udp/4001/quic-v1/p2p/{peer}"),
        ] {
            assert!(
                matches!(PeerAddress::parse(&bad), Err(StoreError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_identity_is_persisted() {
        let storage = Storage::open_temporary().unwrap();
        let first = NodeIdentity::load_or_generate(&storage).unwrap();
        let second = NodeIdentity::load_or_generate(&storage).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[tokio::test]
    async fn test_want_block_and_dont_have() {
        let storage = Storage::open_temporary().unwrap();
        let server = NodeIdentity::load_or_generate(&storage).unwrap();
        let cid = ContentId::raw(b"block");
        storage
            .put_raw_if_absent(Storage::block_key(&cid.to_bytes()), b"block")
            .unwrap();

        let cancel = CancellationToken::new();
        let bound = listen(
            &"/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            storage,
            server.peer_id(),
            cancel.clone(),
        )
        .await
        .unwrap();

        let address = PeerAddress::parse(&bound.to_string()).unwrap();
        let conn = PeerConnection::dial(address, some_peer(), Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(conn.peer_id(), server.peer_id());
        assert_eq!(conn.want(cid).await.unwrap(), Some(b"block".to_vec()));
        assert_eq!(conn.want(ContentId::raw(b"other")).await.unwrap(), None);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_dial_wrong_identity_fails() {
        let storage = Storage::open_temporary().unwrap();
        let server = NodeIdentity::load_or_generate(&storage).unwrap();
        let cancel = CancellationToken::new();
        let bound = listen(
            &"/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            storage,
            server.peer_id(),
            cancel.clone(),
        )
        .await
        .unwrap();

        let port = bound
            .iter()
            .find_map(|p| match p {
                Protocol::Tcp(port) => Some(port),
                _ => None,
            })
            .unwrap();
        let impostor = PeerAddress::parse(&format!("/ip4/127.0.0.1/tcp/{port}/p2p/{}", some_peer()))
            .unwrap();
        let err = PeerConnection::dial(impostor, some_peer(), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unreachable { .. }));
        cancel.cancel();
    }
}
