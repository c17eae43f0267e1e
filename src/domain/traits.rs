//! Domain traits defining contracts for external systems.

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;

use super::error::{AppError, HandlerError};
use super::types::{
    BlockHeader, CallbackError, CallbackPayload, Chain, ChainTransaction, Log, Receipt, SwapStatus,
    SwapTransaction, TxStatus,
};

/// Per-chain RPC facade normalizing divergent chain APIs
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Chain served by this adapter
    fn chain(&self) -> Chain;

    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await.map(|_| ())
    }

    /// Current head height
    async fn block_number(&self) -> Result<u64, AppError>;

    /// Receipt with EVM-shaped logs.
    ///
    /// Returns `BlockchainError::NotFound` while the transaction is not mined.
    async fn receipt_log(&self, tx: &str) -> Result<Receipt, AppError>;

    /// Header for a height, `None` when the node does not know the block
    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, AppError>;

    /// Execution status, `Pending` while not mined
    async fn transaction_status(&self, tx: &str) -> Result<TxStatus, AppError>;

    /// Token balance of `address`; native coin balance when `token` is `None`
    async fn balance_of(&self, address: &str, token: Option<&str>) -> Result<U256, AppError> {
        let _ = (address, token);
        Err(AppError::NotSupported(format!(
            "balance_of not implemented for {}",
            self.chain()
        )))
    }
}

/// Database client trait for persistence operations
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert unless (chain, tx_hash) already exists. Returns whether a row was written.
    async fn insert_chain_transaction(&self, tx: &ChainTransaction) -> Result<bool, AppError>;

    async fn get_chain_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, AppError>;

    /// Transactions of a chain still waiting for a final status
    async fn get_pending_transactions(
        &self,
        chain: Chain,
        limit: i64,
    ) -> Result<Vec<ChainTransaction>, AppError>;

    /// Move a pending transaction to a terminal status.
    ///
    /// Returns `false` when the row was already terminal (no backward transitions).
    async fn finalize_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
        status: TxStatus,
        contract_name: Option<&str>,
        logs: &[Log],
        block_number: u64,
        block_timestamp: i64,
    ) -> Result<bool, AppError>;

    /// Purge a chain's transactions, used by the operator rebuild only
    async fn delete_chain_transactions(&self, chain: Chain) -> Result<u64, AppError>;

    /// Append a failed dispatch to the error sink
    async fn insert_callback_error(&self, record: &CallbackError) -> Result<(), AppError>;

    /// Swaps from `from` to `to` whose destination transaction is not yet final
    async fn get_pending_swaps(
        &self,
        from: Chain,
        to: Chain,
        limit: i64,
    ) -> Result<Vec<SwapTransaction>, AppError>;

    async fn update_swap_confirmations(
        &self,
        swap: &SwapTransaction,
        confirmations: u64,
        chain_label: &str,
        status: SwapStatus,
    ) -> Result<(), AppError>;
}

/// Cache and advisory lock service
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Atomically increment `key` and (re)arm its TTL, returning the new count
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Set a value, expiring after `ttl` when given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), AppError>;
}

/// Business handler bound to one contract
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Apply the transaction's effect.
    ///
    /// Must be idempotent: a redelivery either re-applies safely or returns
    /// `HandlerError::AlreadyProcessed`.
    async fn handle(&self, payload: &CallbackPayload) -> Result<(), HandlerError>;
}
