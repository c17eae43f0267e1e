//! Cross-chain swap correlator.
//!
//! Tracks confirmation depth of bridge transactions on their destination chain.
//! Runs beside the dispatch pipeline and never invokes handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::supervisor::run_every;
use crate::domain::{
    AppError, Chain, ChainAdapter, ConfirmationDepth, DatabaseClient, SwapStatus, SwapTransaction,
};

/// One bridge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapPair {
    pub from: Chain,
    pub to: Chain,
}

impl SwapPair {
    #[must_use]
    pub fn new(from: Chain, to: Chain) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

impl std::fmt::Display for SwapPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub interval: Duration,
    pub batch_size: i64,
    /// Depth at which a swap on the destination chain is final
    pub thresholds: HashMap<Chain, u64>,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            batch_size: 100,
            thresholds: Chain::ALL
                .iter()
                .map(|c| (*c, c.default_swap_confirmations()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub examined: usize,
    pub updated: usize,
    pub confirmed: usize,
    pub unknown: usize,
    pub same_block: usize,
    pub errors: usize,
}

pub struct SwapCorrelator {
    db: Arc<dyn DatabaseClient>,
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    pairs: Vec<SwapPair>,
    config: SwapConfig,
}

impl SwapCorrelator {
    /// Each pair is tracked in both directions
    #[must_use]
    pub fn new(
        db: Arc<dyn DatabaseClient>,
        adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
        pairs: &[SwapPair],
        config: SwapConfig,
    ) -> Self {
        let mut directions = Vec::new();
        for pair in pairs {
            for direction in [*pair, pair.reversed()] {
                if !directions.contains(&direction) {
                    directions.push(direction);
                }
            }
        }
        Self {
            db,
            adapters,
            pairs: directions,
            config,
        }
    }

    #[must_use]
    pub fn directions(&self) -> &[SwapPair] {
        &self.pairs
    }

    fn threshold(&self, chain: Chain) -> u64 {
        self.config
            .thresholds
            .get(&chain)
            .copied()
            .unwrap_or_else(|| chain.default_swap_confirmations())
    }

    /// Depth of `tx` on the adapter's chain, `Unknown` when either lookup fails
    pub async fn confirmation_depth(adapter: &dyn ChainAdapter, tx: &str) -> ConfirmationDepth {
        let receipt = match adapter.receipt_log(tx).await {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!(chain = %adapter.chain(), tx = %tx, error = ?e, "Swap transaction not resolvable");
                return ConfirmationDepth::Unknown;
            }
        };
        match adapter.block_number().await {
            Ok(head) => ConfirmationDepth::Blocks(head.saturating_sub(receipt.block_number)),
            Err(e) => {
                warn!(chain = %adapter.chain(), error = ?e, "Head unavailable for swap depth");
                ConfirmationDepth::Unknown
            }
        }
    }

    async fn track(&self, pair: SwapPair, swap: &SwapTransaction, stats: &mut SwapStats) -> Result<(), AppError> {
        let Some(adapter) = self.adapters.get(&pair.to) else {
            warn!(pair = %pair, "No adapter for swap destination");
            stats.unknown += 1;
            return Ok(());
        };

        let depth = match Self::confirmation_depth(adapter.as_ref(), &swap.tx_hash).await {
            ConfirmationDepth::Unknown => {
                stats.unknown += 1;
                return Ok(());
            }
            ConfirmationDepth::Blocks(0) => {
                debug!(pair = %pair, tx = %swap.tx_hash, "Swap in head block, not confirmed yet");
                stats.same_block += 1;
                return Ok(());
            }
            ConfirmationDepth::Blocks(depth) => depth,
        };

        let status = if depth >= self.threshold(pair.to) {
            stats.confirmed += 1;
            SwapStatus::Confirmed
        } else {
            SwapStatus::Pending
        };
        self.db
            .update_swap_confirmations(swap, depth, pair.to.as_str(), status)
            .await?;
        stats.updated += 1;
        debug!(pair = %pair, tx = %swap.tx_hash, depth, status = %status, "Swap depth updated");
        Ok(())
    }

    /// One pass over every direction's pending swaps.
    ///
    /// A failure on one swap or one direction is logged and counted; the rest
    /// of the sweep still runs.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<SwapStats, AppError> {
        let mut stats = SwapStats::default();
        for pair in &self.pairs {
            let swaps = match self
                .db
                .get_pending_swaps(pair.from, pair.to, self.config.batch_size)
                .await
            {
                Ok(swaps) => swaps,
                Err(e) => {
                    warn!(pair = %pair, error = ?e, "Failed to load pending swaps");
                    stats.errors += 1;
                    continue;
                }
            };
            stats.examined += swaps.len();
            for swap in &swaps {
                if let Err(e) = self.track(*pair, swap, &mut stats).await {
                    warn!(pair = %pair, tx = %swap.tx_hash, error = ?e, "Swap update failed, will retry next tick");
                    stats.errors += 1;
                }
            }
        }
        if stats.examined > 0 {
            info!(stats = ?stats, "Swap tick complete");
        }
        Ok(stats)
    }

    /// Tick every interval until shutdown
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        info!(directions = self.pairs.len(), interval = ?self.config.interval, "Swap correlator started");
        let interval = self.config.interval;
        run_every(interval, shutdown, || {
            let this = Arc::clone(&self);
            async move { this.tick().await.map(|_| ()) }
        })
        .await
    }
}
