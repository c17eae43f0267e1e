//! Error taxonomy for the dispatch core.

use thiserror::Error;

/// Sentinel text a handler reports when the business effect already exists
pub const ALREADY_PROCESSED: &str = "tx exist";

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Raised by loops that observed the shutdown signal
    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    /// Transport-level failures worth another attempt
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Blockchain(
                BlockchainError::Connection(_)
                    | BlockchainError::Timeout(_)
                    | BlockchainError::RpcError(_)
            )
        )
    }
}

#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("No event schema for contract {0}")]
    SchemaNotFound(String),

    #[error("Event {event} not found in schema of {contract}")]
    EventNotFound { contract: String, event: String },

    #[error("Field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid ABI: {0}")]
    InvalidAbi(String),
}

/// Outcome of a failed business handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The effect was already applied by an earlier delivery
    #[error("tx exist")]
    AlreadyProcessed,

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        if message == ALREADY_PROCESSED {
            HandlerError::AlreadyProcessed
        } else {
            HandlerError::Failed(message)
        }
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        HandlerError::failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_processed_sentinel_text() {
        assert_eq!(HandlerError::AlreadyProcessed.to_string(), ALREADY_PROCESSED);
        assert_eq!(HandlerError::failed("tx exist"), HandlerError::AlreadyProcessed);
        assert_eq!(
            HandlerError::failed("insufficient balance"),
            HandlerError::Failed("insufficient balance".to_string())
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Blockchain(BlockchainError::Timeout("t".into())).is_transient());
        assert!(AppError::Blockchain(BlockchainError::RpcError("r".into())).is_transient());
        assert!(!AppError::Blockchain(BlockchainError::NotFound("n".into())).is_transient());
        assert!(!AppError::Cancelled.is_transient());
    }

    #[test]
    fn test_error_display_nesting() {
        let err = AppError::Database(DatabaseError::Query("syntax".into()));
        assert_eq!(err.to_string(), "Database error: Query failed: syntax");
    }
}
