//! Confirmation gate deciding when a transaction's block is final enough.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::ChainAdapter;

/// Default number of blocks that must sit on top of a transaction's block
pub const DEFAULT_CONFIRMATION_THRESHOLD: u64 = 3;

/// Gate verdict. Not being confirmed yet is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { depth: u64 },
    NotYetConfirmed,
}

impl Confirmation {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationGate {
    threshold: u64,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_THRESHOLD)
    }
}

impl ConfirmationGate {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Pure rule: proceed only when `head - tx_block > threshold`.
    #[must_use]
    pub fn evaluate(&self, head: u64, tx_block: u64) -> Confirmation {
        match head.checked_sub(tx_block) {
            Some(depth) if depth > self.threshold => Confirmation::Confirmed { depth },
            _ => Confirmation::NotYetConfirmed,
        }
    }

    /// Evaluate against the adapter's current head.
    ///
    /// A head that cannot be fetched yields `NotYetConfirmed`.
    pub async fn check(&self, adapter: &Arc<dyn ChainAdapter>, tx_block: u64) -> Confirmation {
        match adapter.block_number().await {
            Ok(head) => {
                let verdict = self.evaluate(head, tx_block);
                debug!(chain = %adapter.chain(), head, tx_block, verdict = ?verdict, "Confirmation gate");
                verdict
            }
            Err(e) => {
                warn!(chain = %adapter.chain(), error = ?e, "Head unavailable, treating as not yet confirmed");
                Confirmation::NotYetConfirmed
            }
        }
    }
}
