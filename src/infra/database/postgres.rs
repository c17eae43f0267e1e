//! PostgreSQL database client implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, CallbackError, Chain, ChainTransaction, DatabaseClient, DatabaseError, Log,
    SwapStatus, SwapTransaction, TxStatus,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::Query(e.to_string()))
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    column: &str,
    raw: &str,
) -> Result<T, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::Database(DatabaseError::Query(format!("{}: {}", column, e))))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_chain_transaction(row: &sqlx::postgres::PgRow) -> Result<ChainTransaction, AppError> {
        let chain: String = row.get("chain");
        let status: String = row.get("status");
        let logs: Json<Vec<Log>> = row.get("logs");
        let block_number: i64 = row.get("block_number");

        Ok(ChainTransaction {
            chain: parse_column("chain", &chain)?,
            tx_hash: row.get("tx_hash"),
            contract_name: row.get("contract_name"),
            logs: logs.0,
            status: parse_column("status", &status)?,
            block_number: u64::try_from(block_number).unwrap_or_default(),
            block_timestamp: row.get("block_timestamp"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_swap(row: &sqlx::postgres::PgRow) -> Result<SwapTransaction, AppError> {
        let from_chain: String = row.get("from_chain");
        let to_chain: String = row.get("to_chain");
        let status: String = row.get("status");
        let confirmations: i64 = row.get("confirmations");

        Ok(SwapTransaction {
            from_chain: parse_column("from_chain", &from_chain)?,
            to_chain: parse_column("to_chain", &to_chain)?,
            tx_hash: row.get("tx_hash"),
            confirmations: u64::try_from(confirmations).unwrap_or_default(),
            chain_label: row.get("chain_label"),
            status: parse_column("status", &status)?,
            updated_at: row.get("updated_at"),
        })
    }

    /// Register a swap for the correlator to follow
    #[instrument(skip(self))]
    pub async fn insert_swap(&self, from: Chain, to: Chain, tx_hash: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO swap_transactions (from_chain, to_chain, tx_hash, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (from_chain, to_chain, tx_hash) DO NOTHING
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }
}

const CHAIN_TX_COLUMNS: &str = "chain, tx_hash, contract_name, logs, status, block_number, \
     block_timestamp, created_at, updated_at";

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, tx), fields(chain = %tx.chain, tx = %tx.tx_hash))]
    async fn insert_chain_transaction(&self, tx: &ChainTransaction) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chain_transactions (
                chain, tx_hash, contract_name, logs, status,
                block_number, block_timestamp, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (chain, tx_hash) DO NOTHING
            "#,
        )
        .bind(tx.chain.as_str())
        .bind(&tx.tx_hash)
        .bind(tx.contract_name.as_deref())
        .bind(Json(&tx.logs))
        .bind(tx.status.as_str())
        .bind(to_i64(tx.block_number))
        .bind(tx.block_timestamp)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get_chain_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, AppError> {
        let sql = format!(
            "SELECT {} FROM chain_transactions WHERE chain = $1 AND tx_hash = $2",
            CHAIN_TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(chain.as_str())
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        row.as_ref().map(Self::row_to_chain_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn get_pending_transactions(
        &self,
        chain: Chain,
        limit: i64,
    ) -> Result<Vec<ChainTransaction>, AppError> {
        let sql = format!(
            "SELECT {} FROM chain_transactions \
             WHERE chain = $1 AND status = 'pending' \
             ORDER BY block_number ASC, created_at ASC \
             LIMIT $2",
            CHAIN_TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(chain.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(Self::row_to_chain_transaction).collect()
    }

    #[instrument(skip(self, logs))]
    async fn finalize_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
        status: TxStatus,
        contract_name: Option<&str>,
        logs: &[Log],
        block_number: u64,
        block_timestamp: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE chain_transactions
            SET status = $1,
                contract_name = COALESCE($2, contract_name),
                logs = $3,
                block_number = $4,
                block_timestamp = $5,
                updated_at = $6
            WHERE chain = $7 AND tx_hash = $8 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(contract_name)
        .bind(Json(logs))
        .bind(to_i64(block_number))
        .bind(block_timestamp)
        .bind(Utc::now())
        .bind(chain.as_str())
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete_chain_transactions(&self, chain: Chain) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM chain_transactions WHERE chain = $1")
            .bind(chain.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, record), fields(tx = %record.tx, handler = %record.handler_name))]
    async fn insert_callback_error(&self, record: &CallbackError) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO callback_errors (
                id, tx, chain, contract_name, handler_name, error, receipt, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.tx)
        .bind(record.chain.as_str())
        .bind(&record.contract_name)
        .bind(&record.handler_name)
        .bind(&record.error)
        .bind(Json(&record.receipt))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_pending_swaps(
        &self,
        from: Chain,
        to: Chain,
        limit: i64,
    ) -> Result<Vec<SwapTransaction>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT from_chain, to_chain, tx_hash, confirmations, chain_label, status, updated_at
            FROM swap_transactions
            WHERE from_chain = $1 AND to_chain = $2 AND status = 'pending'
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_swap).collect()
    }

    #[instrument(skip(self, swap), fields(tx = %swap.tx_hash))]
    async fn update_swap_confirmations(
        &self,
        swap: &SwapTransaction,
        confirmations: u64,
        chain_label: &str,
        status: SwapStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE swap_transactions
            SET confirmations = $1,
                chain_label = $2,
                status = $3,
                updated_at = NOW()
            WHERE from_chain = $4 AND to_chain = $5 AND tx_hash = $6
            "#,
        )
        .bind(to_i64(confirmations))
        .bind(chain_label)
        .bind(status.as_str())
        .bind(swap.from_chain.as_str())
        .bind(swap.to_chain.as_str())
        .bind(&swap.tx_hash)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_column_rejects_unknown_value() {
        let parsed: Result<TxStatus, _> = parse_column("status", "settled");
        assert!(matches!(
            parsed,
            Err(AppError::Database(DatabaseError::Query(_)))
        ));
        let chain: Chain = parse_column("chain", "Heco").unwrap();
        assert_eq!(chain, Chain::Heco);
    }

    #[test]
    fn test_to_i64_saturates() {
        assert_eq!(to_i64(42), 42);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }
}
