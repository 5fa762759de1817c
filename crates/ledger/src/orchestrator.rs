//! Transaction orchestration.
//!
//! Every write goes through [`TransactionOrchestrator::submit`], which drives
//! one contract call through a fixed state machine:
//!
//! ```text
//! Building -> Signed -> Broadcast -> PendingInclusion -> Included -> Final
//!                                          |                |
//!                                          v                v
//!                                       TimedOut         Reverted
//! ```
//!
//! The gas price is quoted once per submission and a failed quote aborts
//! before anything is signed. Only the receipt polling is retried; a
//! broadcast is never repeated. Every wait other than the broadcast itself
//! yields to cancellation, and after the broadcast each poll is also bounded
//! by the inclusion deadline.

use crate::config::OrchestratorConfig;
use crate::connection::LedgerConnection;
use crate::error::{LedgerError, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use steward_core::{Address, ContractCall, Hash, Receipt, ReceiptStatus, Transaction};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a submitted call. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxState {
    Building,
    Signed,
    Broadcast,
    PendingInclusion,
    Included,
    Final,
    Reverted,
    TimedOut,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Final | TxState::Reverted | TxState::TimedOut)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Building => "building",
            TxState::Signed => "signed",
            TxState::Broadcast => "broadcast",
            TxState::PendingInclusion => "pending-inclusion",
            TxState::Included => "included",
            TxState::Final => "final",
            TxState::Reverted => "reverted",
            TxState::TimedOut => "timed-out",
        };
        f.write_str(name)
    }
}

/// A call that reached finality.
#[derive(Debug, Clone)]
pub struct Submission {
    pub tx_hash: Hash,
    pub receipt: Receipt,
    /// States passed through, in order.
    pub states: Vec<TxState>,
}

/// Records transitions and refuses to move backwards.
struct Tracker {
    method: &'static str,
    tx_hash: Option<Hash>,
    states: Vec<TxState>,
}

impl Tracker {
    fn new(method: &'static str) -> Self {
        debug!(method, state = %TxState::Building, "Transaction state");
        Self {
            method,
            tx_hash: None,
            states: vec![TxState::Building],
        }
    }

    fn current(&self) -> TxState {
        self.states[self.states.len() - 1]
    }

    fn advance(&mut self, next: TxState) {
        if next <= self.current() || self.current().is_terminal() {
            warn!(method = self.method, from = %self.current(), to = %next, "Ignoring backward transition");
            return;
        }
        debug!(method = self.method, tx = ?self.tx_hash, state = %next, "Transaction state");
        self.states.push(next);
    }
}

/// Signs, broadcasts and confirms contract calls for one connection.
pub struct TransactionOrchestrator {
    connection: Arc<LedgerConnection>,
    config: OrchestratorConfig,
}

impl TransactionOrchestrator {
    pub fn new(connection: Arc<LedgerConnection>, config: OrchestratorConfig) -> Self {
        Self { connection, config }
    }

    pub fn connection(&self) -> &LedgerConnection {
        &self.connection
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit `call` to the contract at `to` and wait until it is final.
    ///
    /// Reverted and timed-out transactions are errors carrying the hash.
    /// Cancelling after the broadcast reports the hash as well; the
    /// transaction may still land.
    pub async fn submit(
        &self,
        to: Address,
        call: &ContractCall,
        cancel: &CancellationToken,
    ) -> Result<Submission> {
        let mut tracker = Tracker::new(call.method());
        let rpc = self.connection.rpc();

        let gas_price = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled { tx_hash: None }),
            price = rpc.gas_price() => price.map_err(|e| LedgerError::FeeQuoteFailure(e.to_string()))?,
        };

        let tx_hash = {
            let mut next_nonce = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LedgerError::Cancelled { tx_hash: None }),
                guard = self.connection.lock_nonce() => guard,
            };
            let nonce = match *next_nonce {
                Some(nonce) => nonce,
                None => {
                    let address = self.connection.address();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LedgerError::Cancelled { tx_hash: None }),
                        nonce = rpc.pending_nonce(&address) => nonce?,
                    }
                }
            };
            if cancel.is_cancelled() {
                return Err(LedgerError::Cancelled { tx_hash: None });
            }

            let identity = self.connection.identity();
            let credential = self.connection.credential();
            let tx = Transaction::call(
                identity.chain_id,
                nonce,
                credential.public_key.clone(),
                to,
                call,
                gas_price,
            )
            .signed(credential);
            tracker.advance(TxState::Signed);

            match rpc.send_transaction(&tx).await {
                Ok(tx_hash) => {
                    *next_nonce = Some(nonce + 1);
                    tx_hash
                }
                Err(err) => {
                    // The node's view of the nonce is authoritative after a refusal.
                    *next_nonce = None;
                    warn!(method = call.method(), nonce, error = %err, "Broadcast failed");
                    return Err(err.into());
                }
            }
        };
        tracker.tx_hash = Some(tx_hash);
        tracker.advance(TxState::Broadcast);
        info!(method = call.method(), tx = %tx_hash, %to, "Broadcast transaction");

        let receipt = self.wait_for_finality(tx_hash, &mut tracker, cancel).await?;
        Ok(Submission {
            tx_hash,
            receipt,
            states: tracker.states,
        })
    }

    async fn wait_for_finality(
        &self,
        tx_hash: Hash,
        tracker: &mut Tracker,
        cancel: &CancellationToken,
    ) -> Result<Receipt> {
        let rpc = self.connection.rpc();
        let started = Instant::now();
        let deadline = started + self.config.inclusion_timeout;
        tracker.advance(TxState::PendingInclusion);

        let receipt = loop {
            let poll = rpc.receipt(&tx_hash);
            match self.race(poll, tx_hash, started, deadline, tracker, cancel).await? {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => {}
                Err(err) => warn!(tx = %tx_hash, error = %err, "Receipt poll failed"),
            }
            self.pause(tx_hash, started, deadline, tracker, cancel).await?;
        };

        tracker.advance(TxState::Included);
        if let ReceiptStatus::Reverted(reason) = &receipt.status {
            tracker.advance(TxState::Reverted);
            warn!(tx = %tx_hash, reason = %reason, "Transaction reverted");
            return Err(LedgerError::from_revert(reason, Some(tx_hash)));
        }
        debug!(tx = %tx_hash, block = receipt.block_number, "Transaction included");

        loop {
            let poll = rpc.block_number();
            match self.race(poll, tx_hash, started, deadline, tracker, cancel).await? {
                Ok(head) => {
                    let depth = head.saturating_sub(receipt.block_number) + 1;
                    if depth >= self.config.confirmations() {
                        tracker.advance(TxState::Final);
                        info!(tx = %tx_hash, block = receipt.block_number, depth, "Transaction final");
                        return Ok(receipt);
                    }
                }
                Err(err) => warn!(tx = %tx_hash, error = %err, "Block number poll failed"),
            }
            self.pause(tx_hash, started, deadline, tracker, cancel).await?;
        }
    }

    /// Run one poll, giving up at the deadline or on cancellation.
    async fn race<F: Future>(
        &self,
        poll: F,
        tx_hash: Hash,
        started: Instant,
        deadline: Instant,
        tracker: &mut Tracker,
        cancel: &CancellationToken,
    ) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(stopped(tx_hash)),
            _ = sleep_until(deadline) => Err(timed_out(tx_hash, started, tracker)),
            out = poll => Ok(out),
        }
    }

    /// Sleep one poll interval, or fail on deadline or cancellation.
    async fn pause(
        &self,
        tx_hash: Hash,
        started: Instant,
        deadline: Instant,
        tracker: &mut Tracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(tx_hash, started, tracker));
        }
        let pause = self.config.poll_interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(stopped(tx_hash)),
            _ = sleep(pause) => Ok(()),
        }
    }
}

fn timed_out(tx_hash: Hash, started: Instant, tracker: &mut Tracker) -> LedgerError {
    tracker.advance(TxState::TimedOut);
    warn!(tx = %tx_hash, "Transaction not final before deadline");
    LedgerError::TimedOut {
        tx_hash,
        waited: started.elapsed(),
    }
}

fn stopped(tx_hash: Hash) -> LedgerError {
    info!(tx = %tx_hash, "Stopped waiting for transaction");
    LedgerError::Cancelled {
        tx_hash: Some(tx_hash),
    }
}
