//! Submission, confirmation and failure paths against the development ledger.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use steward_core::{
    sha256, Address, ContractCall, Hash, Keypair, LedgerRpc, Receipt, RpcError, Transaction,
};
use steward_devnet::{Devnet, DevnetConfig, Mining};
use steward_ledger::{LedgerError, LedgerSession, OrchestratorConfig, TxState};
use tokio_util::sync::CancellationToken;

fn fast() -> OrchestratorConfig {
    OrchestratorConfig {
        confirmations: 1,
        poll_interval: Duration::from_millis(10),
        inclusion_timeout: Duration::from_secs(5),
    }
}

async fn session(devnet: &Arc<Devnet>, keypair: &Keypair, config: OrchestratorConfig) -> LedgerSession {
    LedgerSession::open(
        devnet.clone(),
        keypair.clone(),
        devnet.addresses(),
        config,
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn add_guardian(seed: u8) -> ContractCall {
    ContractCall::AddGuardian {
        guardian: Address::from_bytes([seed; 20]),
        commitment: sha256(&[seed]),
    }
}

#[tokio::test]
async fn test_submit_reaches_final() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = session(&devnet, &keypair, fast()).await;
    let to = devnet.addresses().key_recovery;

    let submission = session
        .registry
        .orchestrator()
        .submit(to, &add_guardian(1), &CancellationToken::new())
        .await
        .unwrap();

    assert!(submission.receipt.is_success());
    assert_eq!(submission.receipt.tx_hash, submission.tx_hash);
    assert_eq!(
        submission.states,
        vec![
            TxState::Building,
            TxState::Signed,
            TxState::Broadcast,
            TxState::PendingInclusion,
            TxState::Included,
            TxState::Final,
        ]
    );
    assert_eq!(session.identity().chain_id, 1337);
    assert_eq!(session.identity().address, keypair.address());
}

#[tokio::test]
async fn test_fee_quote_failure_broadcasts_nothing() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = session(&devnet, &keypair, fast()).await;
    devnet.fail_fee_quote(true);

    let err = session
        .registry
        .orchestrator()
        .submit(devnet.addresses().key_recovery, &add_guardian(1), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::FeeQuoteFailure(_)));
    assert_eq!(devnet.block_number().await.unwrap(), 0);
    assert_eq!(devnet.pending_nonce(&keypair.address()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_never_included_times_out_with_hash() {
    let devnet = Arc::new(Devnet::new(DevnetConfig {
        mining: Mining::Manual,
        ..DevnetConfig::default()
    }));
    let keypair = Keypair::generate();
    let config = OrchestratorConfig {
        inclusion_timeout: Duration::from_millis(100),
        ..fast()
    };
    let session = session(&devnet, &keypair, config).await;

    let err = session
        .registry
        .orchestrator()
        .submit(devnet.addresses().key_recovery, &add_guardian(1), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        LedgerError::TimedOut { tx_hash, waited } => {
            assert!(waited >= Duration::from_millis(100));
            // The broadcast stands; mining it later still applies it.
            devnet.mine_block();
            let receipt = devnet.receipt(&tx_hash).await.unwrap().unwrap();
            assert!(receipt.is_success());
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_while_waiting_reports_hash() {
    let devnet = Arc::new(Devnet::new(DevnetConfig {
        mining: Mining::Manual,
        ..DevnetConfig::default()
    }));
    let keypair = Keypair::generate();
    let session = session(&devnet, &keypair, fast()).await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let err = session
        .registry
        .orchestrator()
        .submit(devnet.addresses().key_recovery, &add_guardian(1), &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    let tx_hash = match err {
        LedgerError::Cancelled { tx_hash: Some(hash) } => hash,
        other => panic!("expected Cancelled with hash, got {other:?}"),
    };
    assert_eq!(devnet.pending_count(), 1);
    devnet.mine_block();
    assert!(devnet.receipt(&tx_hash).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_before_broadcast_has_no_hash() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = session(&devnet, &keypair, fast()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session
        .registry
        .orchestrator()
        .submit(devnet.addresses().key_recovery, &add_guardian(1), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::Cancelled { tx_hash: None });
    assert_eq!(devnet.pending_nonce(&keypair.address()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_revert_surfaces_reason_and_hash() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = session(&devnet, &keypair, fast()).await;
    let orchestrator = session.registry.orchestrator();
    let to = devnet.addresses().key_recovery;
    let cancel = CancellationToken::new();

    orchestrator.submit(to, &add_guardian(1), &cancel).await.unwrap();
    let err = orchestrator
        .submit(to, &add_guardian(1), &cancel)
        .await
        .unwrap_err();

    match &err {
        LedgerError::Reverted { reason, tx_hash } => {
            assert_eq!(reason, "GuardianExists");
            let receipt = devnet.receipt(&tx_hash.unwrap()).await.unwrap().unwrap();
            assert!(!receipt.is_success());
        }
        other => panic!("expected Reverted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_submissions_are_serialized() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = Arc::new(session(&devnet, &keypair, fast()).await);
    let to = devnet.addresses().key_recovery;

    let mut handles = Vec::new();
    for seed in 1..=8u8 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session
                .registry
                .orchestrator()
                .submit(to, &add_guardian(seed), &CancellationToken::new())
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().receipt.is_success());
    }

    assert_eq!(devnet.pending_nonce(&keypair.address()).await.unwrap(), 8);
    assert_eq!(session.recovery.guardians(keypair.address()).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_stale_nonce_is_rejected_then_resynced() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let first = session(&devnet, &keypair, fast()).await;
    let second = session(&devnet, &keypair, fast()).await;
    let to = devnet.addresses().key_recovery;
    let cancel = CancellationToken::new();

    first.registry.orchestrator().submit(to, &add_guardian(1), &cancel).await.unwrap();
    second.registry.orchestrator().submit(to, &add_guardian(2), &cancel).await.unwrap();

    // `first` still caches nonce 1, which `second` has used.
    let err = first
        .registry
        .orchestrator()
        .submit(to, &add_guardian(3), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SubmissionFailure(_)));

    first.registry.orchestrator().submit(to, &add_guardian(3), &cancel).await.unwrap();
    assert_eq!(devnet.pending_nonce(&keypair.address()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_waits_for_confirmation_depth() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let config = OrchestratorConfig {
        confirmations: 3,
        ..fast()
    };
    let session = session(&devnet, &keypair, config).await;

    let miner = {
        let devnet = devnet.clone();
        tokio::spawn(async move {
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                devnet.mine_block();
            }
        })
    };

    let submission = session
        .registry
        .orchestrator()
        .submit(devnet.addresses().key_recovery, &add_guardian(1), &CancellationToken::new())
        .await
        .unwrap();
    miner.await.unwrap();

    let head = devnet.block_number().await.unwrap();
    assert!(head >= submission.receipt.block_number + 2);
}

#[tokio::test]
async fn test_unreachable_ledger_fails_connect() {
    let devnet = Arc::new(Devnet::default());
    devnet.set_offline(true);
    let result = LedgerSession::open(
        devnet.clone(),
        Keypair::generate(),
        devnet.addresses(),
        fast(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(LedgerError::ConnectionFailure(_))));
}

/// A devnet behind a node that stops answering some requests.
struct Stalling {
    devnet: Arc<Devnet>,
    nonce: bool,
    receipts: bool,
}

impl Stalling {
    fn receipts(devnet: &Arc<Devnet>) -> Arc<Self> {
        Arc::new(Self {
            devnet: devnet.clone(),
            nonce: false,
            receipts: true,
        })
    }

    fn nonce(devnet: &Arc<Devnet>) -> Arc<Self> {
        Arc::new(Self {
            devnet: devnet.clone(),
            nonce: true,
            receipts: false,
        })
    }
}

#[async_trait]
impl LedgerRpc for Stalling {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.devnet.chain_id().await
    }

    async fn gas_price(&self) -> Result<u64, RpcError> {
        self.devnet.gas_price().await
    }

    async fn pending_nonce(&self, address: &Address) -> Result<u64, RpcError> {
        if self.nonce {
            std::future::pending::<()>().await;
        }
        self.devnet.pending_nonce(address).await
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash, RpcError> {
        self.devnet.send_transaction(tx).await
    }

    async fn receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, RpcError> {
        if self.receipts {
            std::future::pending::<()>().await;
        }
        self.devnet.receipt(tx_hash).await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.devnet.block_number().await
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        self.devnet.call(to, data).await
    }
}

async fn stalled_session(
    rpc: Arc<Stalling>,
    keypair: &Keypair,
    config: OrchestratorConfig,
) -> LedgerSession {
    let addresses = rpc.devnet.addresses();
    LedgerSession::open(rpc, keypair.clone(), addresses, config, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unanswered_receipt_poll_still_times_out() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let config = OrchestratorConfig {
        inclusion_timeout: Duration::from_millis(200),
        ..fast()
    };
    let session = stalled_session(Stalling::receipts(&devnet), &keypair, config).await;

    let call = add_guardian(1);
    let cancel = CancellationToken::new();
    let submit = session.registry.orchestrator().submit(
        devnet.addresses().key_recovery,
        &call,
        &cancel,
    );
    let err = tokio::time::timeout(Duration::from_secs(2), submit)
        .await
        .expect("submit should give up at the inclusion deadline")
        .unwrap_err();

    match err {
        LedgerError::TimedOut { waited, .. } => assert!(waited >= Duration::from_millis(200)),
        other => panic!("expected TimedOut, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unanswered_receipt_poll_yields_to_cancel() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = stalled_session(Stalling::receipts(&devnet), &keypair, fast()).await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let call = add_guardian(1);
    let submit = session.registry.orchestrator().submit(
        devnet.addresses().key_recovery,
        &call,
        &cancel,
    );
    let err = tokio::time::timeout(Duration::from_secs(2), submit)
        .await
        .expect("submit should stop on cancellation")
        .unwrap_err();
    canceller.await.unwrap();

    match err {
        LedgerError::Cancelled { tx_hash: Some(hash) } => {
            // Instant mining applied it; only the answer was lost.
            assert!(devnet.receipt(&hash).await.unwrap().is_some());
        }
        other => panic!("expected Cancelled with hash, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unanswered_nonce_fetch_yields_to_cancel() {
    let devnet = Arc::new(Devnet::default());
    let keypair = Keypair::generate();
    let session = stalled_session(Stalling::nonce(&devnet), &keypair, fast()).await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let call = add_guardian(1);
    let submit = session.registry.orchestrator().submit(
        devnet.addresses().key_recovery,
        &call,
        &cancel,
    );
    let err = tokio::time::timeout(Duration::from_secs(2), submit)
        .await
        .expect("submit should stop on cancellation")
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err, LedgerError::Cancelled { tx_hash: None });
    assert_eq!(devnet.pending_count(), 0);
    assert_eq!(devnet.block_number().await.unwrap(), 0);
}
