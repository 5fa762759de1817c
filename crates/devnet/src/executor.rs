//! Transaction execution engine.
//!
//! Executes included transactions against the contracts and produces
//! receipts.

use crate::contracts::{execution_gas, Contracts, Env};
use std::collections::HashMap;
use steward_core::{revert, Address, Receipt, ReceiptStatus, Transaction};
use tracing::debug;

/// Executes transactions against contract state.
pub struct Executor<'a> {
    contracts: &'a mut Contracts,
    /// Next nonce per sender, advanced for every included transaction.
    nonces: &'a mut HashMap<Address, u64>,
}

impl<'a> Executor<'a> {
    pub fn new(contracts: &'a mut Contracts, nonces: &'a mut HashMap<Address, u64>) -> Self {
        Self { contracts, nonces }
    }

    /// Execute one transaction included in block `block_number`.
    ///
    /// Reverts still consume the nonce and report the gas spent.
    pub fn execute_transaction(
        &mut self,
        tx: &Transaction,
        block_number: u64,
        timestamp: u64,
    ) -> Receipt {
        let tx_hash = tx.hash();
        let sender = tx.from();
        *self.nonces.entry(sender).or_insert(0) += 1;

        let intrinsic = tx.intrinsic_gas();
        let (status, gas_used, output) = match tx.decode_call() {
            Err(_) => (
                ReceiptStatus::Reverted(revert::MALFORMED_CALLDATA.to_string()),
                intrinsic,
                Vec::new(),
            ),
            Ok(call) => {
                let gas = intrinsic + execution_gas(&call);
                if gas > tx.gas_limit {
                    (
                        ReceiptStatus::Reverted(revert::OUT_OF_GAS.to_string()),
                        tx.gas_limit,
                        Vec::new(),
                    )
                } else {
                    let env = Env {
                        sender,
                        nonce: tx.nonce,
                        timestamp,
                    };
                    match self.contracts.execute(&tx.to, &call, &env) {
                        Ok(output) => (ReceiptStatus::Success, gas, output),
                        Err(reason) => (ReceiptStatus::Reverted(reason.to_string()), gas, Vec::new()),
                    }
                }
            }
        };

        debug!(tx = %tx_hash, block = block_number, ?status, gas_used, "Executed transaction");

        Receipt {
            tx_hash,
            block_number,
            status,
            gas_used,
            output,
        }
    }
}
