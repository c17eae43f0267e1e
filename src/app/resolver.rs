//! Receipt resolver: receipt and block header fetch with bounded retry,
//! followed by confirmation, status, and log validation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::confirmation::{Confirmation, ConfirmationGate};
use super::guard::ResultCache;
use crate::domain::{AppError, BlockHeader, BlockchainError, ChainAdapter, Receipt, TxStatus};

/// Bounded retry for chain calls. The delay defaults to zero: attempts run back to back.
///
/// Only transient transport errors are retried; `NotFound` and decode errors
/// return on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts || !e.is_transient() => return Err(e),
                Err(e) => {
                    debug!(call = %what, attempt, error = ?e, "Retrying chain call");
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Mined with a non-success status
    FailedStatus,
    /// Succeeded but emitted no (allow-listed) logs
    EmptyLogs,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::FailedStatus => write!(f, "failed status"),
            RejectReason::EmptyLogs => write!(f, "empty logs"),
        }
    }
}

/// A receipt that passed every check
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReceipt {
    pub receipt: Receipt,
    pub header: BlockHeader,
    pub depth: u64,
}

impl ResolvedReceipt {
    #[must_use]
    pub fn block_timestamp(&self) -> i64 {
        self.header.timestamp
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ready(ResolvedReceipt),
    /// Not mined, too shallow, or header not yet served. Re-evaluate later.
    NotYetConfirmed { block_number: Option<u64> },
    /// Terminal for this transaction
    Rejected { reason: RejectReason, receipt: Receipt },
}

pub struct ReceiptResolver {
    gate: ConfirmationGate,
    policy: RetryPolicy,
    headers: Option<ResultCache>,
}

fn is_not_found(e: &AppError) -> bool {
    matches!(e, AppError::Blockchain(BlockchainError::NotFound(_)))
}

impl ReceiptResolver {
    #[must_use]
    pub fn new(gate: ConfirmationGate, policy: RetryPolicy) -> Self {
        Self {
            gate,
            policy,
            headers: None,
        }
    }

    /// Cache block headers, which many transactions share
    #[must_use]
    pub fn with_header_cache(mut self, headers: ResultCache) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    async fn fetch_header(
        &self,
        adapter: &Arc<dyn ChainAdapter>,
        block_number: u64,
    ) -> Result<BlockHeader, AppError> {
        let fetch = || async {
            self.policy
                .retry("block_header", || adapter.block_header(block_number))
                .await?
                .ok_or_else(|| {
                    AppError::Blockchain(BlockchainError::NotFound(format!(
                        "block {}",
                        block_number
                    )))
                })
        };

        match &self.headers {
            Some(cache) => {
                let key = format!("block_header:{}:{}", adapter.chain(), block_number);
                cache.get_or_insert_with(&key, fetch).await
            }
            None => fetch().await,
        }
    }

    /// Resolve a transaction into a dispatchable receipt.
    ///
    /// Transport errors that outlive the retry budget are returned as errors.
    #[instrument(skip(self, adapter), fields(chain = %adapter.chain()))]
    pub async fn resolve(
        &self,
        adapter: &Arc<dyn ChainAdapter>,
        tx: &str,
    ) -> Result<Resolution, AppError> {
        let receipt = match self
            .policy
            .retry("receipt_log", || adapter.receipt_log(tx))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) if is_not_found(&e) => {
                debug!(tx = %tx, "Receipt not available yet");
                return Ok(Resolution::NotYetConfirmed { block_number: None });
            }
            Err(e) => return Err(e),
        };

        let depth = match self.gate.check(adapter, receipt.block_number).await {
            Confirmation::Confirmed { depth } => depth,
            Confirmation::NotYetConfirmed => {
                return Ok(Resolution::NotYetConfirmed {
                    block_number: Some(receipt.block_number),
                });
            }
        };

        if receipt.status != TxStatus::Success {
            return Ok(Resolution::Rejected {
                reason: RejectReason::FailedStatus,
                receipt,
            });
        }
        if receipt.logs.is_empty() {
            warn!(tx = %tx, "Successful receipt without logs");
            return Ok(Resolution::Rejected {
                reason: RejectReason::EmptyLogs,
                receipt,
            });
        }

        let header = match self.fetch_header(adapter, receipt.block_number).await {
            Ok(header) => header,
            Err(e) if is_not_found(&e) => {
                warn!(tx = %tx, block = receipt.block_number, "Block header not served yet");
                return Ok(Resolution::NotYetConfirmed {
                    block_number: Some(receipt.block_number),
                });
            }
            Err(e) => return Err(e),
        };

        Ok(Resolution::Ready(ResolvedReceipt {
            receipt,
            header,
            depth,
        }))
    }
}
