//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::{
    AppError, BlockHeader, BlockchainError, CallbackError, CallbackHandler, CallbackPayload, Chain,
    ChainAdapter, ChainTransaction, DatabaseClient, DatabaseError, HandlerError, Log, Receipt,
    SwapStatus, SwapTransaction, TxStatus,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

type SwapKey = (Chain, Chain, String);

/// Mock database client for testing
pub struct MockDatabaseClient {
    transactions: Arc<Mutex<HashMap<(Chain, String), ChainTransaction>>>,
    callback_errors: Arc<Mutex<Vec<CallbackError>>>,
    swaps: Arc<Mutex<HashMap<SwapKey, SwapTransaction>>>,
    swap_updates: AtomicUsize,
    failing_swaps: Mutex<HashSet<String>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            transactions: Arc::new(Mutex::new(HashMap::new())),
            callback_errors: Arc::new(Mutex::new(Vec::new())),
            swaps: Arc::new(Mutex::new(HashMap::new())),
            swap_updates: AtomicUsize::new(0),
            failing_swaps: Mutex::new(HashSet::new()),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn transaction(&self, chain: Chain, tx: &str) -> Option<ChainTransaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(&(chain, tx.to_string()))
            .cloned()
    }

    pub fn transactions(&self) -> Vec<ChainTransaction> {
        self.transactions.lock().unwrap().values().cloned().collect()
    }

    pub fn callback_errors(&self) -> Vec<CallbackError> {
        self.callback_errors.lock().unwrap().clone()
    }

    /// Seed a pending swap
    pub fn insert_swap(&self, from: Chain, to: Chain, tx: &str) {
        let swap = SwapTransaction {
            from_chain: from,
            to_chain: to,
            tx_hash: tx.to_string(),
            confirmations: 0,
            chain_label: None,
            status: SwapStatus::Pending,
            updated_at: Utc::now(),
        };
        self.swaps
            .lock()
            .unwrap()
            .insert((from, to, tx.to_string()), swap);
    }

    pub fn swap(&self, from: Chain, to: Chain, tx: &str) -> Option<SwapTransaction> {
        self.swaps
            .lock()
            .unwrap()
            .get(&(from, to, tx.to_string()))
            .cloned()
    }

    /// Make every confirmation update of one swap fail
    pub fn fail_swap_updates(&self, tx: &str) {
        self.failing_swaps.lock().unwrap().insert(tx.to_string());
    }

    /// Number of `update_swap_confirmations` calls
    pub fn swap_update_count(&self) -> usize {
        self.swap_updates.load(Ordering::SeqCst)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_chain_transaction(&self, tx: &ChainTransaction) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut storage = self.transactions.lock().unwrap();
        let key = (tx.chain, tx.tx_hash.clone());
        if storage.contains_key(&key) {
            return Ok(false);
        }
        storage.insert(key, tx.clone());
        Ok(true)
    }

    async fn get_chain_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, AppError> {
        self.check_should_fail()?;
        Ok(self.transaction(chain, tx_hash))
    }

    async fn get_pending_transactions(
        &self,
        chain: Chain,
        limit: i64,
    ) -> Result<Vec<ChainTransaction>, AppError> {
        self.check_should_fail()?;
        let storage = self.transactions.lock().unwrap();
        let mut pending: Vec<ChainTransaction> = storage
            .values()
            .filter(|t| t.chain == chain && t.status == TxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.block_number);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn finalize_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
        status: TxStatus,
        contract_name: Option<&str>,
        logs: &[Log],
        block_number: u64,
        block_timestamp: i64,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut storage = self.transactions.lock().unwrap();
        match storage.get_mut(&(chain, tx_hash.to_string())) {
            Some(row) if row.status == TxStatus::Pending => {
                row.status = status;
                row.block_number = block_number;
                if let Some(name) = contract_name {
                    row.contract_name = Some(name.to_string());
                }
                row.logs = logs.to_vec();
                row.block_timestamp = block_timestamp;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_chain_transactions(&self, chain: Chain) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut storage = self.transactions.lock().unwrap();
        let before = storage.len();
        storage.retain(|(c, _), _| *c != chain);
        Ok((before - storage.len()) as u64)
    }

    async fn insert_callback_error(&self, record: &CallbackError) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.callback_errors.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get_pending_swaps(
        &self,
        from: Chain,
        to: Chain,
        limit: i64,
    ) -> Result<Vec<SwapTransaction>, AppError> {
        self.check_should_fail()?;
        let storage = self.swaps.lock().unwrap();
        let mut pending: Vec<SwapTransaction> = storage
            .values()
            .filter(|s| s.from_chain == from && s.to_chain == to && s.status == SwapStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn update_swap_confirmations(
        &self,
        swap: &SwapTransaction,
        confirmations: u64,
        chain_label: &str,
        status: SwapStatus,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.swap_updates.fetch_add(1, Ordering::SeqCst);
        if self.failing_swaps.lock().unwrap().contains(&swap.tx_hash) {
            return Err(AppError::Database(DatabaseError::Query(format!(
                "Mock update failure for {}",
                swap.tx_hash
            ))));
        }
        let mut storage = self.swaps.lock().unwrap();
        let key = (swap.from_chain, swap.to_chain, swap.tx_hash.clone());
        if let Some(row) = storage.get_mut(&key) {
            row.confirmations = confirmations;
            row.chain_label = Some(chain_label.to_string());
            row.status = status;
            row.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Mock chain adapter serving scripted receipts.
///
/// Block headers are synthesized for any height unless one was set explicitly.
pub struct MockChainAdapter {
    chain: Chain,
    head: AtomicU64,
    head_failing: AtomicBool,
    receipts: Mutex<HashMap<String, Receipt>>,
    headers: Mutex<HashMap<u64, Option<BlockHeader>>>,
    receipt_failures: AtomicUsize,
    receipt_calls: AtomicUsize,
}

impl MockChainAdapter {
    #[must_use]
    pub fn new(chain: Chain, head: u64) -> Self {
        Self {
            chain,
            head: AtomicU64::new(head),
            head_failing: AtomicBool::new(false),
            receipts: Mutex::new(HashMap::new()),
            headers: Mutex::new(HashMap::new()),
            receipt_failures: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_head_failing(&self, failing: bool) {
        self.head_failing.store(failing, Ordering::SeqCst);
    }

    pub fn insert_receipt(&self, tx: &str, receipt: Receipt) {
        self.receipts.lock().unwrap().insert(tx.to_string(), receipt);
    }

    /// Override the header served for a height (`None` means unknown block)
    pub fn set_header(&self, block_number: u64, header: Option<BlockHeader>) {
        self.headers.lock().unwrap().insert(block_number, header);
    }

    /// Fail the next `n` receipt lookups with a timeout
    pub fn fail_next_receipts(&self, n: usize) {
        self.receipt_failures.store(n, Ordering::SeqCst);
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    /// Header the mock synthesizes for a height
    #[must_use]
    pub fn synthetic_header(block_number: u64) -> BlockHeader {
        BlockHeader {
            number: block_number,
            hash: format!("0x{:064x}", block_number),
            timestamp: 1_700_000_000 + block_number as i64,
        }
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        if self.head_failing.load(Ordering::SeqCst) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Mock head unavailable".to_string(),
            )));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn receipt_log(&self, tx: &str) -> Result<Receipt, AppError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.receipt_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.receipt_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Blockchain(BlockchainError::Timeout(
                "Mock timeout".to_string(),
            )));
        }
        self.receipts
            .lock()
            .unwrap()
            .get(tx)
            .cloned()
            .ok_or_else(|| AppError::Blockchain(BlockchainError::NotFound(tx.to_string())))
    }

    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, AppError> {
        let headers = self.headers.lock().unwrap();
        Ok(match headers.get(&block_number) {
            Some(header) => header.clone(),
            None => Some(Self::synthetic_header(block_number)),
        })
    }

    async fn transaction_status(&self, tx: &str) -> Result<TxStatus, AppError> {
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(tx)
            .map(|r| r.status)
            .unwrap_or(TxStatus::Pending))
    }
}

/// Handler that records every payload it sees
#[derive(Default)]
pub struct RecordingHandler {
    payloads: Mutex<Vec<CallbackPayload>>,
}

impl RecordingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<CallbackPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackHandler for RecordingHandler {
    async fn handle(&self, payload: &CallbackPayload) -> Result<(), HandlerError> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Handler that always fails with a fixed message
pub struct FailingHandler {
    message: String,
    calls: AtomicUsize,
}

impl FailingHandler {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallbackHandler for FailingHandler {
    async fn handle(&self, _payload: &CallbackPayload) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::failed(self.message.clone()))
    }
}

/// EVM log emitted by `address`
#[must_use]
pub fn sample_log(address: &str) -> Log {
    Log {
        address: address.to_string(),
        topics: vec![format!("0x{}", "dd".repeat(32))],
        data: "0x".to_string(),
    }
}

/// Successful receipt mined at `block_number` with one log from `address`
#[must_use]
pub fn sample_receipt(tx: &str, block_number: u64, address: &str) -> Receipt {
    Receipt {
        tx_hash: tx.to_string(),
        block_number,
        status: TxStatus::Success,
        logs: vec![sample_log(address)],
        gas_used: 21_000,
        fee: Some(21_000),
    }
}

/// Heco payload for `contract_name`
#[must_use]
pub fn sample_payload(contract_name: &str) -> CallbackPayload {
    CallbackPayload {
        tx: "0xabc".to_string(),
        chain: Chain::Heco,
        contract_name: contract_name.to_string(),
        block_timestamp: 1_700_000_100,
        receipt: sample_receipt("0xabc", 100, "0x00000000000000000000000000000000000000ab"),
    }
}
