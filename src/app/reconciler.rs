//! Periodic sweep over Pending transactions until they reach a terminal status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::service::{Settlement, TransactionPipeline};
use super::supervisor::run_every;
use crate::domain::{AppError, Chain, DatabaseClient};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// Counters for one reconciler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub examined: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub ignored: usize,
    /// Payloads still queued in this process
    pub in_flight: usize,
    pub errors: usize,
}

pub struct StatusReconciler {
    pipeline: Arc<TransactionPipeline>,
    db: Arc<dyn DatabaseClient>,
    config: ReconcilerConfig,
}

impl StatusReconciler {
    #[must_use]
    pub fn new(
        pipeline: Arc<TransactionPipeline>,
        db: Arc<dyn DatabaseClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pipeline,
            db,
            config,
        }
    }

    /// One sweep over a chain's Pending transactions.
    ///
    /// A failure on one transaction is logged and does not stop the sweep.
    #[instrument(skip(self))]
    pub async fn tick(&self, chain: Chain) -> Result<ReconcileStats, AppError> {
        let pending = self
            .db
            .get_pending_transactions(chain, self.config.batch_size)
            .await?;

        let mut stats = ReconcileStats {
            examined: pending.len(),
            ..Default::default()
        };

        for row in pending {
            match self.pipeline.settle(chain, &row.tx_hash).await {
                Ok(Settlement::Dispatched { .. }) => stats.dispatched += 1,
                Ok(Settlement::Rejected(_)) => stats.failed += 1,
                Ok(Settlement::Deferred) => stats.still_pending += 1,
                Ok(Settlement::InFlight) => stats.in_flight += 1,
                Ok(Settlement::Ignored) | Ok(Settlement::AlreadyFinal(_)) => stats.ignored += 1,
                Err(e) => {
                    warn!(chain = %chain, tx = %row.tx_hash, error = ?e, "Reconcile failed, will retry next tick");
                    stats.errors += 1;
                }
            }
        }

        if stats.examined > 0 {
            info!(chain = %chain, stats = ?stats, "Reconcile tick complete");
        } else {
            debug!(chain = %chain, "No pending transactions");
        }
        Ok(stats)
    }

    /// Tick every interval until shutdown
    pub async fn run(
        self: Arc<Self>,
        chain: Chain,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        info!(chain = %chain, interval = ?self.config.interval, "Status reconciler started");
        let interval = self.config.interval;
        run_every(interval, shutdown, || {
            let this = Arc::clone(&self);
            async move { this.tick(chain).await.map(|_| ()) }
        })
        .await
    }
}
