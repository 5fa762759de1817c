//! Ledger client for steward.
//!
//! A [`LedgerConnection`] binds one signing credential to one ledger node.
//! The [`TransactionOrchestrator`] turns contract calls into final
//! transactions, the [`ContractRegistry`] routes them to the three contracts,
//! and the workflows expose the consent, provenance and recovery operations:
//!
//! ```text
//!  ConsentWorkflow   DataProvenanceWorkflow   KeyRecoveryWorkflow
//!          \                  |                      /
//!           +------ ContractGateway (registry) -----+
//!                             |
//!                  TransactionOrchestrator
//!                             |
//!                     LedgerConnection
//!                             |
//!                   LedgerRpc (HTTP, devnet)
//! ```
//!
//! Nothing here is global: every session is built from a [`LedgerConfig`]
//! or explicit parts, so independent sessions can share a process.

pub mod config;
pub mod connection;
pub mod consent;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod provenance;
pub mod recovery;
pub mod registry;

pub use config::{contract_addresses, LedgerConfig, OrchestratorConfig};
pub use connection::{LedgerConnection, LedgerIdentity};
pub use consent::{consent_terms, sign_consent_terms, ConsentGranted, ConsentWorkflow};
pub use error::{LedgerError, Result};
pub use http::HttpRpc;
pub use orchestrator::{Submission, TransactionOrchestrator, TxState};
pub use provenance::{DataProvenanceWorkflow, DataRegistered, Registration};
pub use recovery::{KeyRecoveryWorkflow, RecoveryApproved, RecoveryInitiated};
pub use registry::{ContractGateway, ContractRegistry};

use std::sync::Arc;
use steward_core::{ContractAddresses, Keypair, LedgerRpc};
use tokio_util::sync::CancellationToken;

/// One credential's view of the three contracts.
pub struct LedgerSession {
    pub registry: Arc<ContractRegistry>,
    pub consent: ConsentWorkflow,
    pub provenance: DataProvenanceWorkflow,
    pub recovery: KeyRecoveryWorkflow,
}

impl LedgerSession {
    /// Connect `credential` through `rpc` and bind the workflows.
    pub async fn open(
        rpc: Arc<dyn LedgerRpc>,
        credential: Keypair,
        addresses: ContractAddresses,
        config: OrchestratorConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let connection = Arc::new(LedgerConnection::connect(rpc, credential, cancel).await?);
        let orchestrator = TransactionOrchestrator::new(connection, config);
        let registry = Arc::new(ContractRegistry::new(addresses, orchestrator));
        Ok(Self::with_gateway(registry))
    }

    /// Open a session over HTTP as described by `config`.
    pub async fn from_config(config: &LedgerConfig, cancel: &CancellationToken) -> Result<Self> {
        let credential = config.credential()?;
        let rpc = HttpRpc::new(config.rpc_url.clone(), config.request_timeout)?;
        Self::open(
            Arc::new(rpc),
            credential,
            config.contracts,
            config.orchestrator,
            cancel,
        )
        .await
    }

    fn with_gateway(registry: Arc<ContractRegistry>) -> Self {
        let gateway: Arc<dyn ContractGateway> = registry.clone();
        Self {
            consent: ConsentWorkflow::new(gateway.clone()),
            provenance: DataProvenanceWorkflow::new(gateway.clone()),
            recovery: KeyRecoveryWorkflow::new(gateway),
            registry,
        }
    }

    pub fn identity(&self) -> LedgerIdentity {
        self.registry.orchestrator().connection().identity()
    }
}
