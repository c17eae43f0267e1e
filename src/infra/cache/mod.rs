//! Cache backends for the idempotency guard, cursors, and result caching.

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;
