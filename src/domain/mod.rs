//! Domain layer containing core types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    ALREADY_PROCESSED, AppError, BlockchainError, CacheError, ConfigError, DatabaseError,
    DecodeError, HandlerError,
};
pub use traits::{CacheClient, CallbackHandler, ChainAdapter, DatabaseClient};
pub use types::{
    BlockHeader, CallbackError, CallbackPayload, Chain, ChainFamily, ChainTransaction,
    ConfirmationDepth, ContractAddressMap, HealthResponse, HealthStatus, Log, Receipt, ScanCursor,
    SwapStatus, SwapTransaction, TxStatus,
};
