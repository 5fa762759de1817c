//! Block exchange between two stores over loopback.

use std::time::Duration;
use steward_store::{ContentStore, StoreConfig, StoreError};
use tokio_util::sync::CancellationToken;

fn open() -> ContentStore {
    ContentStore::open(StoreConfig {
        connect_timeout: Duration::from_secs(2),
        ..StoreConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_fetch_graph_from_peer() {
    let cancel = CancellationToken::new();
    let provider = open();
    let data: Vec<u8> = (0..900 * 1024).map(|i| (i % 199) as u8).collect();
    let added = provider.add(&data).unwrap();
    let addr = provider
        .listen("/ip4/127.0.0.1/tcp/0", cancel.clone())
        .await
        .unwrap();

    let consumer = open();
    assert!(matches!(
        consumer.get(&added.cid),
        Err(StoreError::NotFound(_))
    ));

    let peer_id = consumer
        .connect_to_peer(&addr.to_string(), &cancel)
        .await
        .unwrap();
    assert_eq!(peer_id, provider.peer_id());
    assert_eq!(consumer.peers().len(), 1);

    let fetched = consumer.fetch(&added.cid, &cancel).await.unwrap();
    assert_eq!(fetched, added.block_count);
    assert_eq!(consumer.get(&added.cid).unwrap(), data);

    // Everything is local now.
    assert_eq!(consumer.fetch(&added.cid, &cancel).await.unwrap(), 0);
    cancel.cancel();
}

#[tokio::test]
async fn test_fetch_unknown_is_not_found() {
    let cancel = CancellationToken::new();
    let provider = open();
    let addr = provider
        .listen("/ip4/127.0.0.1/tcp/0", cancel.clone())
        .await
        .unwrap();

    let consumer = open();
    consumer
        .connect_to_peer(&addr.to_string(), &cancel)
        .await
        .unwrap();
    let missing = steward_store::ContentId::raw(b"nobody has this");
    assert!(matches!(
        consumer.fetch(&missing, &cancel).await,
        Err(StoreError::NotFound(_))
    ));
    cancel.cancel();
}

#[tokio::test]
async fn test_connect_invalid_address() {
    let store = open();
    let cancel = CancellationToken::new();
    assert!(matches!(
        store.connect_to_peer("/ip4/127.0.0.1/tcp", &cancel).await,
        Err(StoreError::InvalidAddress(_))
    ));
    assert!(store.peers().is_empty());
}

#[tokio::test]
async fn test_connect_unreachable_peer() {
    // Bind then drop a listener to get a port nobody answers on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let store = open();
    let other = open();
    let addr = format!("/ip4/127.0.0.1/tcp/{port}/p2p/{}", other.peer_id());

    let err = store
        .connect_to_peer(&addr, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unreachable { .. }));
}

#[tokio::test]
async fn test_connect_honours_cancellation() {
    let store = open();
    let other = open();
    let cancel = CancellationToken::new();
    cancel.cancel();
    // Non-routable address so the dial cannot complete first.
    let addr = format!("/ip4/10.255.255.1/tcp/4001/p2p/{}", other.peer_id());
    assert!(matches!(
        store.connect_to_peer(&addr, &cancel).await,
        Err(StoreError::Cancelled)
    ));
}
