//! Idempotency guard and generic result cache over the cache service.
//!
//! The guard is advisory: it bounds concurrent and back-to-back execution of
//! one key for a TTL window. It is not a permanent deduplication ledger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::{AppError, CacheClient};

/// Default lifetime of a dispatch record
pub const DEFAULT_DISPATCH_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub ttl: Duration,
    /// Drop the record as soon as the protected call returns, even on success
    pub release_on_completion: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_DISPATCH_TTL,
            release_on_completion: false,
        }
    }
}

/// Result of a guarded call
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T> {
    Executed(T),
    /// Another holder is running, or just ran, the same key
    Skipped,
}

impl<T> Guarded<T> {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Guarded::Skipped)
    }
}

pub struct IdempotencyGuard {
    cache: Arc<dyn CacheClient>,
    config: GuardConfig,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheClient>, config: GuardConfig) -> Self {
        Self { cache, config }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Run `f` unless `key` is already held.
    ///
    /// Errors from the cache itself propagate and `f` is not run.
    pub async fn run<F, Fut, T, E>(&self, key: &str, f: F) -> Result<Guarded<Result<T, E>>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let count = self.cache.incr_with_ttl(key, self.config.ttl).await?;
        if count > 1 {
            debug!(key = %key, count, "Dispatch record held, skipping");
            return Ok(Guarded::Skipped);
        }

        let result = f().await;

        if result.is_err() || self.config.release_on_completion {
            if let Err(e) = self.cache.delete(key).await {
                warn!(key = %key, error = ?e, "Failed to release dispatch record");
            }
        }

        Ok(Guarded::Executed(result))
    }
}

/// JSON result cache keyed by caller-chosen strings
#[derive(Clone)]
pub struct ResultCache {
    cache: Arc<dyn CacheClient>,
    ttl: Duration,
}

impl ResultCache {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheClient>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Unreadable cache entries and cache outages fall through to `compute`.
    pub async fn get_or_insert_with<T, F, Fut>(&self, key: &str, compute: F) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = ?e, "Cache read failed"),
        }

        let value = compute().await?;
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(key, &raw, Some(self.ttl)).await {
                    warn!(key = %key, error = ?e, "Cache write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Value not cacheable"),
        }
        Ok(value)
    }
}
