//! Redis-backed cache client.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use crate::domain::{AppError, CacheClient, CacheError};

/// Shared Redis connection with automatic reconnects
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self, AppError> {
        info!("Connecting to Redis...");
        let client = redis::Client::open(redis_url).map_err(CacheError::from)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(CacheError::from)?;
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(CacheError::from)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(CacheError::from)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl_secs(ttl)).await,
            None => conn.set(key, value).await,
        }
        .map_err(CacheError::from)?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await.map_err(CacheError::from)?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await.map_err(CacheError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounds_up_to_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(5)), 5);
    }
}
