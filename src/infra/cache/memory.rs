//! In-process cache for single-instance deployments and tests.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused clock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::domain::{AppError, CacheClient, CacheError};

#[derive(Debug, Clone)]
enum Stored {
    Value(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    stored: Stored,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Cache(CacheError::Command(format!(
        "WRONGTYPE operation against key {}",
        key
    )))
}

/// DashMap-backed cache with per-key expiry
#[derive(Debug, Default)]
pub struct MemoryCache {
    store: DashMap<String, Slot>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, ignoring expired ones
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store.iter().filter(|s| !s.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        let slot = self.store.get(key)?.clone();
        if slot.is_expired(now) {
            self.store.remove_if(key, |_, s| s.is_expired(now));
            return None;
        }
        Some(slot)
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError> {
        let now = Instant::now();
        let expires_at = Some(now + ttl);
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let current = if slot.is_expired(now) {
                    0
                } else {
                    match &slot.stored {
                        Stored::Value(v) => v.parse::<i64>().map_err(|_| {
                            AppError::Cache(CacheError::Command(format!(
                                "value at {} is not an integer",
                                key
                            )))
                        })?,
                        Stored::Hash(_) => return Err(wrong_type(key)),
                    }
                };
                let next = current + 1;
                *slot = Slot {
                    stored: Stored::Value(next.to_string()),
                    expires_at,
                };
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    stored: Stored::Value("1".to_string()),
                    expires_at,
                });
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.store.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match self.live(key) {
            None => Ok(None),
            Some(Slot {
                stored: Stored::Value(v),
                ..
            }) => Ok(Some(v)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError> {
        self.store.insert(
            key.to_string(),
            Slot {
                stored: Stored::Value(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        match self.live(key) {
            None => Ok(None),
            Some(Slot {
                stored: Stored::Hash(h),
                ..
            }) => Ok(h.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut slot = self.store.entry(key.to_string()).or_insert_with(|| Slot {
            stored: Stored::Hash(HashMap::new()),
            expires_at: None,
        });
        if slot.is_expired(now) {
            *slot = Slot {
                stored: Stored::Hash(HashMap::new()),
                expires_at: None,
            };
        }
        match &mut slot.stored {
            Stored::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Stored::Value(_) => Err(wrong_type(key)),
        }
    }
}
