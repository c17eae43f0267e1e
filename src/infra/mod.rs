//! Infrastructure layer implementations.

pub mod blockchain;
pub mod cache;
pub mod database;

pub use blockchain::{
    EventLogDecoder, EventSchemaRegistry, EvmChainAdapter, RpcClientConfig, TronChainAdapter,
};
pub use cache::{MemoryCache, RedisCache};
pub use database::{PostgresClient, PostgresConfig};
