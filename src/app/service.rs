//! Transaction pipeline: the entry point the scanner calls per discovered
//! transaction, also driven by the status reconciler.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::cursor::ScanCursorStore;
use super::resolver::{ReceiptResolver, RejectReason, Resolution};
use super::worker::CallbackQueue;
use crate::domain::{
    AppError, CacheClient, CallbackPayload, Chain, ChainAdapter, ChainTransaction,
    ContractAddressMap, DatabaseClient, HealthResponse, HealthStatus, Log, ScanCursor, TxStatus,
};

/// What the pipeline did with one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Queued once per mapped contract; the workers persist Success
    Dispatched { contract_names: Vec<String> },
    /// Payloads from an earlier pass are still queued in this process
    InFlight,
    /// Left Pending for the reconciler
    Deferred,
    /// Persisted as Failed without dispatch
    Rejected(RejectReason),
    /// No mapped contract in the logs
    Ignored,
    /// Already Success or Failed
    AlreadyFinal(TxStatus),
}

pub struct TransactionPipeline {
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    contracts: HashMap<Chain, ContractAddressMap>,
    resolver: Arc<ReceiptResolver>,
    queue: CallbackQueue,
    db: Arc<dyn DatabaseClient>,
    cache: Arc<dyn CacheClient>,
    cursors: Arc<ScanCursorStore>,
}

impl TransactionPipeline {
    #[must_use]
    pub fn new(
        adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
        contracts: HashMap<Chain, ContractAddressMap>,
        resolver: Arc<ReceiptResolver>,
        queue: CallbackQueue,
        db: Arc<dyn DatabaseClient>,
        cache: Arc<dyn CacheClient>,
        cursors: Arc<ScanCursorStore>,
    ) -> Self {
        Self {
            adapters,
            contracts,
            resolver,
            queue,
            db,
            cache,
            cursors,
        }
    }

    /// Chains with an adapter, in a stable order
    #[must_use]
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.adapters.keys().copied().collect();
        chains.sort_by_key(|c| c.as_str());
        chains
    }

    pub fn adapter(&self, chain: Chain) -> Result<&Arc<dyn ChainAdapter>, AppError> {
        self.adapters
            .get(&chain)
            .ok_or_else(|| AppError::NotSupported(format!("no adapter configured for {}", chain)))
    }

    #[must_use]
    pub fn cursors(&self) -> &Arc<ScanCursorStore> {
        &self.cursors
    }

    /// Gate, decode, and dispatch a transaction the scanner found.
    #[instrument(skip(self))]
    pub async fn process_discovered(&self, chain: Chain, tx: &str) -> Result<Settlement, AppError> {
        self.settle(chain, tx).await
    }

    /// Drive a transaction as far as it can go right now.
    ///
    /// Terminal rows are never revisited. A transaction that is not yet
    /// confirmed is stored as Pending and left for the reconciler, and so
    /// is a dispatched one until every payload has been routed.
    pub async fn settle(&self, chain: Chain, tx: &str) -> Result<Settlement, AppError> {
        if let Some(existing) = self.db.get_chain_transaction(chain, tx).await? {
            if existing.status.is_terminal() {
                debug!(chain = %chain, tx = %tx, status = %existing.status, "Transaction already final");
                return Ok(Settlement::AlreadyFinal(existing.status));
            }
        }
        if self.queue.in_flight().contains(chain, tx) {
            return Ok(Settlement::InFlight);
        }

        let adapter = self.adapter(chain)?;
        match self.resolver.resolve(adapter, tx).await? {
            Resolution::NotYetConfirmed { block_number } => {
                let row = ChainTransaction::pending(chain, tx, block_number.unwrap_or_default());
                if self.db.insert_chain_transaction(&row).await? {
                    info!(chain = %chain, tx = %tx, block = ?block_number, "Transaction pending confirmation");
                }
                Ok(Settlement::Deferred)
            }
            Resolution::Rejected { reason, receipt } => {
                warn!(chain = %chain, tx = %tx, reason = %reason, "Transaction rejected");
                self.record_final(
                    chain,
                    tx,
                    TxStatus::Failed,
                    None,
                    &receipt.logs,
                    receipt.block_number,
                    0,
                )
                .await?;
                Ok(Settlement::Rejected(reason))
            }
            Resolution::Ready(resolved) => {
                let contract_names = self
                    .contracts
                    .get(&chain)
                    .map(|map| map.resolve_logs(&resolved.receipt.logs))
                    .unwrap_or_default();
                let block_timestamp = resolved.block_timestamp();
                let block_number = resolved.receipt.block_number;

                if contract_names.is_empty() {
                    debug!(chain = %chain, tx = %tx, "No mapped contract in logs");
                    // clears a Pending row left by an earlier pass
                    self.db
                        .finalize_transaction(
                            chain,
                            tx,
                            TxStatus::Success,
                            None,
                            &resolved.receipt.logs,
                            block_number,
                            block_timestamp,
                        )
                        .await?;
                    return Ok(Settlement::Ignored);
                }

                // Pending until the workers route every payload
                let row = ChainTransaction::pending(chain, tx, block_number);
                self.db.insert_chain_transaction(&row).await?;

                let payloads = contract_names
                    .iter()
                    .map(|contract_name| CallbackPayload {
                        tx: tx.to_string(),
                        chain,
                        contract_name: contract_name.clone(),
                        block_timestamp,
                        receipt: resolved.receipt.clone(),
                    })
                    .collect();
                if !self.queue.dispatch(chain, tx, payloads).await? {
                    debug!(chain = %chain, tx = %tx, "Transaction already in flight");
                    return Ok(Settlement::InFlight);
                }

                info!(chain = %chain, tx = %tx, contracts = ?contract_names, "Transaction queued for dispatch");
                Ok(Settlement::Dispatched { contract_names })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_final(
        &self,
        chain: Chain,
        tx: &str,
        status: TxStatus,
        contract_name: Option<&str>,
        logs: &[Log],
        block_number: u64,
        block_timestamp: i64,
    ) -> Result<(), AppError> {
        let mut row = ChainTransaction::pending(chain, tx, block_number);
        row.status = status;
        row.contract_name = contract_name.map(str::to_string);
        row.logs = logs.to_vec();
        row.block_timestamp = block_timestamp;

        if !self.db.insert_chain_transaction(&row).await? {
            self.db
                .finalize_transaction(
                    chain,
                    tx,
                    status,
                    contract_name,
                    logs,
                    block_number,
                    block_timestamp,
                )
                .await?;
        }
        Ok(())
    }

    /// Mark `height` as handed off for `chain`
    #[instrument(skip(self))]
    pub async fn complete_block(&self, chain: Chain, height: u64) -> Result<u64, AppError> {
        self.cursors.advance(chain, height).await
    }

    /// Operator rebuild of one chain
    pub async fn rebuild(&self, chain: Chain) -> Result<ScanCursor, AppError> {
        self.cursors.rebuild(chain).await
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.db.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let cache = match self.cache.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let mut adapters: Vec<_> = self.adapters.iter().collect();
        adapters.sort_by_key(|(c, _)| c.as_str());
        let mut chains = Vec::with_capacity(adapters.len());
        for (&chain, adapter) in adapters {
            let status = match adapter.health_check().await {
                Ok(()) => HealthStatus::Healthy,
                Err(e) => {
                    warn!(chain = %chain, error = ?e, "Chain adapter unhealthy");
                    HealthStatus::Unhealthy
                }
            };
            chains.push((chain, status));
        }
        HealthResponse::new(database, cache, chains)
    }
}
