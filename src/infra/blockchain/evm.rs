//! Chain adapter for Ethereum JSON-RPC compatible chains.

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, BlockHeader, BlockchainError, Chain, ChainAdapter, Log, Receipt, TxStatus,
};

/// `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    /// Extra attempts on transport errors. Zero when the caller owns the
    /// retry budget, as the receipt resolver does.
    pub max_retries: u32,
    /// Pause between attempts. Zero keeps retries immediate.
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Abstract provider for JSON-RPC interactions to enable testing
#[async_trait]
pub trait JsonRpcProvider: Send + Sync {
    /// Send a JSON-RPC request, returning the raw `result` (may be `null`)
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError>;
}

/// HTTP-based JSON-RPC provider
pub struct HttpJsonRpcProvider {
    http_client: Client,
    rpc_url: String,
}

impl HttpJsonRpcProvider {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[async_trait]
impl JsonRpcProvider for HttpJsonRpcProvider {
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
                }
            })?;

        let rpc_response: JsonRpcResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::RpcError(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }

        Ok(rpc_response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: String,
    /// Absent on pre-Byzantium receipts
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    effective_gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    hash: String,
    timestamp: String,
}

/// JSON-RPC chain adapter for EVM-like chains
pub struct EvmChainAdapter {
    chain: Chain,
    provider: Box<dyn JsonRpcProvider>,
    config: RpcClientConfig,
}

impl EvmChainAdapter {
    /// Create a new adapter with custom configuration
    pub fn new(chain: Chain, rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let provider = HttpJsonRpcProvider::new(rpc_url, config.timeout)?;
        info!(chain = %chain, rpc_url = %rpc_url, "Created EVM chain adapter");
        Ok(Self {
            chain,
            provider: Box::new(provider),
            config,
        })
    }

    /// Create a new adapter with default configuration
    pub fn with_defaults(chain: Chain, rpc_url: &str) -> Result<Self, AppError> {
        Self::new(chain, rpc_url, RpcClientConfig::default())
    }

    /// Create a new adapter with a specific provider (useful for testing)
    pub fn with_provider(
        chain: Chain,
        provider: Box<dyn JsonRpcProvider>,
        config: RpcClientConfig,
    ) -> Self {
        Self {
            chain,
            provider,
            config,
        }
    }

    /// Make an RPC call with retries
    #[instrument(skip(self, params), fields(chain = %self.chain))]
    async fn rpc_call<P: Serialize + Send + Sync, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, AppError> {
        let params_value = serde_json::to_value(params).map_err(|e| {
            AppError::Blockchain(BlockchainError::RpcError(format!(
                "Serialization error: {}",
                e
            )))
        })?;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self
                .provider
                .send_request(method, params_value.clone())
                .await
            {
                Ok(result_value) => {
                    return serde_json::from_value(result_value).map_err(|e| {
                        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                            "{}: {}",
                            method, e
                        )))
                    });
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    async fn fetch_receipt(&self, tx: &str) -> Result<Option<RpcReceipt>, AppError> {
        self.rpc_call("eth_getTransactionReceipt", [tx]).await
    }
}

/// Parse a `0x`-prefixed hex quantity
pub(crate) fn parse_quantity(value: &str) -> Result<u64, AppError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| {
        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
            "bad quantity {}: {}",
            value, e
        )))
    })
}

fn parse_u256(value: &str) -> Result<U256, AppError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| {
        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
            "bad uint256 {}: {}",
            value, e
        )))
    })
}

fn receipt_status(status: Option<&str>) -> TxStatus {
    match status {
        Some("0x1") | None => TxStatus::Success,
        Some(_) => TxStatus::Failed,
    }
}

pub(crate) fn validate_address(address: &str) -> Result<&str, AppError> {
    let digits = address.strip_prefix("0x").unwrap_or(address);
    if digits.len() != 40 || hex::decode(digits).is_err() {
        return Err(AppError::Blockchain(BlockchainError::InvalidAddress(
            address.to_string(),
        )));
    }
    Ok(digits)
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = AppError;

    fn try_from(raw: RpcReceipt) -> Result<Self, Self::Error> {
        let gas_used = raw.gas_used.as_deref().map(parse_quantity).transpose()?;
        let gas_price = raw
            .effective_gas_price
            .as_deref()
            .map(parse_quantity)
            .transpose()?;
        let fee = match (gas_used, gas_price) {
            (Some(used), Some(price)) => used.checked_mul(price),
            _ => None,
        };

        Ok(Receipt {
            tx_hash: raw.transaction_hash,
            block_number: parse_quantity(&raw.block_number)?,
            status: receipt_status(raw.status.as_deref()),
            logs: raw
                .logs
                .into_iter()
                .map(|log| Log {
                    address: log.address.to_lowercase(),
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
            gas_used: gas_used.unwrap_or_default(),
            fee,
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmChainAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn block_number(&self) -> Result<u64, AppError> {
        let head: String = self.rpc_call("eth_blockNumber", Vec::<()>::new()).await?;
        parse_quantity(&head)
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn receipt_log(&self, tx: &str) -> Result<Receipt, AppError> {
        match self.fetch_receipt(tx).await? {
            Some(raw) => Receipt::try_from(raw),
            None => Err(AppError::Blockchain(BlockchainError::NotFound(format!(
                "receipt for {}",
                tx
            )))),
        }
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, AppError> {
        let params = serde_json::json!([format!("0x{:x}", block_number), false]);
        let block: Option<RpcBlock> = self.rpc_call("eth_getBlockByNumber", params).await?;
        block
            .map(|b| {
                Ok(BlockHeader {
                    number: parse_quantity(&b.number)?,
                    hash: b.hash,
                    timestamp: parse_quantity(&b.timestamp)? as i64,
                })
            })
            .transpose()
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn transaction_status(&self, tx: &str) -> Result<TxStatus, AppError> {
        Ok(match self.fetch_receipt(tx).await? {
            Some(raw) => receipt_status(raw.status.as_deref()),
            None => TxStatus::Pending,
        })
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn balance_of(&self, address: &str, token: Option<&str>) -> Result<U256, AppError> {
        let owner = validate_address(address)?;
        let raw: String = match token {
            None => {
                self.rpc_call("eth_getBalance", [address, "latest"])
                    .await?
            }
            Some(token) => {
                validate_address(token)?;
                let data = format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, owner.to_lowercase());
                let params = serde_json::json!([{ "to": token, "data": data }, "latest"]);
                self.rpc_call("eth_call", params).await?
            }
        };
        parse_u256(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<serde_json::Value, AppError>>>,
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<serde_json::Value, AppError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JsonRpcProvider for std::sync::Arc<ScriptedProvider> {
        async fn send_request(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, AppError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(serde_json::Value::Null))
        }
    }

    fn adapter(provider: std::sync::Arc<ScriptedProvider>, max_retries: u32) -> EvmChainAdapter {
        EvmChainAdapter::with_provider(
            Chain::Heco,
            Box::new(provider),
            RpcClientConfig {
                max_retries,
                ..Default::default()
            },
        )
    }

    fn timeout() -> Result<serde_json::Value, AppError> {
        Err(AppError::Blockchain(BlockchainError::Timeout(
            "mock timeout".to_string(),
        )))
    }

    #[test]
    fn test_rpc_client_config_default() {
        let config = RpcClientConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay, Duration::ZERO);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x64").unwrap(), 100);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_receipt_status_mapping() {
        assert_eq!(receipt_status(Some("0x1")), TxStatus::Success);
        assert_eq!(receipt_status(Some("0x0")), TxStatus::Failed);
        assert_eq!(receipt_status(None), TxStatus::Success);
    }

    #[tokio::test]
    async fn test_retry_logic_success_after_failures() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![
            timeout(),
            timeout(),
            Ok(serde_json::json!("0x68")),
        ]));
        let client = adapter(provider.clone(), 3);

        assert_eq!(client.block_number().await.unwrap(), 104);
        assert_eq!(provider.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_logic_exhausted() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![
            timeout(),
            timeout(),
            timeout(),
        ]));
        let client = adapter(provider.clone(), 2);

        let result = client.block_number().await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::Timeout(_)))
        ));
        assert_eq!(provider.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_receipt_log_maps_fields() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x64",
            "status": "0x1",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x2",
            "logs": [{
                "address": "0xABCDEF0000000000000000000000000000000001",
                "topics": ["0x01"],
                "data": "0x"
            }]
        }))]));
        let client = adapter(provider, 0);

        let receipt = client.receipt_log("0xabc").await.unwrap();
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(receipt.gas_used, 21000);
        assert_eq!(receipt.fee, Some(42000));
        assert_eq!(
            receipt.logs[0].address,
            "0xabcdef0000000000000000000000000000000001"
        );
    }

    #[tokio::test]
    async fn test_receipt_log_not_found() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![Ok(
            serde_json::Value::Null,
        )]));
        let client = adapter(provider, 0);

        let result = client.receipt_log("0xabc").await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_transaction_status_pending_when_unmined() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![Ok(
            serde_json::Value::Null,
        )]));
        let client = adapter(provider, 0);
        assert_eq!(
            client.transaction_status("0xabc").await.unwrap(),
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_balance_of_token_builds_call_data() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!(
            "0x00000000000000000000000000000000000000000000000000000000000003e8"
        ))]));
        let client = adapter(provider.clone(), 0);

        let balance = client
            .balance_of(
                "0x00000000000000000000000000000000000000AA",
                Some("0x00000000000000000000000000000000000000bb"),
            )
            .await
            .unwrap();
        assert_eq!(balance, U256::from(1000u64));

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].0, "eth_call");
        let data = calls[0].1[0]["data"].as_str().unwrap();
        assert!(data.starts_with("0x70a08231"));
        assert!(data.ends_with("00000000000000000000000000000000000000aa"));
        assert_eq!(data.len(), 2 + 8 + 64);
    }

    #[tokio::test]
    async fn test_balance_of_rejects_bad_address() {
        let provider = std::sync::Arc::new(ScriptedProvider::new(vec![]));
        let client = adapter(provider, 0);
        let result = client.balance_of("not-an-address", None).await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::InvalidAddress(_)))
        ));
    }
}
