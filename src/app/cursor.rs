//! Per-chain scan cursor kept in the cache service as one hash.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AppError, CacheClient, CacheError, Chain, DatabaseClient, ScanCursor};

/// Hash holding `chain -> last handed-off block`
pub const CURSOR_HASH_KEY: &str = "scan_cursor";

pub struct ScanCursorStore {
    cache: Arc<dyn CacheClient>,
    db: Arc<dyn DatabaseClient>,
    init_blocks: HashMap<Chain, u64>,
    /// Serializes read-modify-write per chain; chains never contend
    locks: HashMap<Chain, Mutex<()>>,
}

impl ScanCursorStore {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheClient>,
        db: Arc<dyn DatabaseClient>,
        init_blocks: HashMap<Chain, u64>,
    ) -> Self {
        let locks = Chain::ALL.iter().map(|c| (*c, Mutex::new(()))).collect();
        Self {
            cache,
            db,
            init_blocks,
            locks,
        }
    }

    fn init_block(&self, chain: Chain) -> u64 {
        self.init_blocks.get(&chain).copied().unwrap_or_default()
    }

    async fn stored(&self, chain: Chain) -> Result<Option<u64>, AppError> {
        let raw = self.cache.hget(CURSOR_HASH_KEY, chain.as_str()).await?;
        raw.map(|v| {
            v.parse::<u64>().map_err(|e| {
                AppError::Cache(CacheError::Serialization(format!(
                    "cursor for {}: {}",
                    chain, e
                )))
            })
        })
        .transpose()
    }

    /// Current cursor; a chain never scanned starts at its init block
    #[instrument(skip(self))]
    pub async fn load(&self, chain: Chain) -> Result<ScanCursor, AppError> {
        let init_block = self.init_block(chain);
        let last_block = self
            .stored(chain)
            .await?
            .unwrap_or_else(|| init_block.saturating_sub(1));
        Ok(ScanCursor {
            chain,
            last_block,
            init_block,
        })
    }

    /// Record `height` as handed off. Never moves the cursor backwards.
    ///
    /// Returns the cursor value after the call.
    #[instrument(skip(self))]
    pub async fn advance(&self, chain: Chain, height: u64) -> Result<u64, AppError> {
        let _held = match self.locks.get(&chain) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let current = self.stored(chain).await?;
        if current.is_some_and(|c| c >= height) {
            debug!(chain = %chain, height, current = ?current, "Cursor already past height");
            return Ok(current.unwrap_or(height));
        }

        self.cache
            .hset(CURSOR_HASH_KEY, chain.as_str(), &height.to_string())
            .await?;
        Ok(height)
    }

    /// Operator rebuild: purge the chain's transactions and rewind to the init block.
    ///
    /// The only path that lowers a cursor.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, chain: Chain) -> Result<ScanCursor, AppError> {
        let _held = match self.locks.get(&chain) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let purged = self.db.delete_chain_transactions(chain).await?;
        let init_block = self.init_block(chain);
        let last_block = init_block.saturating_sub(1);
        self.cache
            .hset(CURSOR_HASH_KEY, chain.as_str(), &last_block.to_string())
            .await?;

        warn!(chain = %chain, purged, init_block, "Chain rebuilt from init block");
        info!(chain = %chain, next_block = init_block, "Scanning will resume");
        Ok(ScanCursor {
            chain,
            last_block,
            init_block,
        })
    }
}
