//! HTTP front end of the development ledger.
//!
//! `POST /` and `POST /rpc` take a JSON [`RpcRequest`] and answer with a JSON
//! [`RpcResponse`]; `GET /health` reports the chain id and head.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use steward_core::{LedgerRpc, RpcRequest, RpcResponse};
use steward_devnet::Devnet;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Build the router serving `devnet`.
pub fn router(devnet: Arc<Devnet>) -> Router {
    Router::new()
        .route("/", post(rpc))
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(devnet)
}

async fn rpc(State(devnet): State<Arc<Devnet>>, Json(request): Json<RpcRequest>) -> Json<RpcResponse> {
    Json(dispatch(devnet.as_ref(), request).await)
}

async fn health(State(devnet): State<Arc<Devnet>>) -> Json<serde_json::Value> {
    let head = devnet.latest_block();
    Json(json!({
        "status": "ok",
        "chain_id": devnet.config().chain_id,
        "block_number": head.number,
        "pending": devnet.pending_count(),
    }))
}

/// Answer one request against any ledger.
pub async fn dispatch(ledger: &dyn LedgerRpc, request: RpcRequest) -> RpcResponse {
    debug!(?request, "RPC");
    match request {
        RpcRequest::ChainId => RpcResponse::from_result(ledger.chain_id().await),
        RpcRequest::GasPrice => RpcResponse::from_result(ledger.gas_price().await),
        RpcRequest::PendingNonce { address } => {
            RpcResponse::from_result(ledger.pending_nonce(&address).await)
        }
        RpcRequest::SendTransaction { transaction } => {
            RpcResponse::from_result(ledger.send_transaction(&transaction).await)
        }
        RpcRequest::Receipt { tx_hash } => RpcResponse::from_result(ledger.receipt(&tx_hash).await),
        RpcRequest::BlockNumber => RpcResponse::from_result(ledger.block_number().await),
        RpcRequest::Call { to, data } => RpcResponse::from_result(ledger.call(&to, &data).await),
    }
}

/// Mine a block every `interval` until cancelled, so confirmation depths
/// above one make progress.
pub fn spawn_miner(devnet: Arc<Devnet>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    devnet.mine_block();
                }
            }
        }
        debug!("Block timer stopped");
    })
}

/// Serve `devnet` on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    devnet: Arc<Devnet>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Serving ledger RPC");
    axum::serve(listener, router(devnet))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
