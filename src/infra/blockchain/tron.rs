//! Chain adapter for Tron.
//!
//! Head, blocks, and receipts come from the full node HTTP API (`/wallet/*`).
//! Receipts there carry no usable logs, so they are rebuilt from the TronGrid
//! event endpoint through the [`EventLogDecoder`].

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

use super::address;
use super::events::{EventLogDecoder, RawTronEvent};
use super::evm::RpcClientConfig;
use crate::domain::{
    AppError, BlockHeader, BlockchainError, Chain, ChainAdapter, Receipt, TxStatus,
};

/// Abstract HTTP surface of a Tron node to enable testing
#[async_trait]
pub trait TronApi: Send + Sync {
    /// POST a JSON body to a full node path such as `/wallet/getnowblock`
    async fn post(&self, path: &str, body: serde_json::Value)
    -> Result<serde_json::Value, AppError>;

    /// GET an event API path such as `/v1/transactions/{id}/events`
    async fn get(&self, path: &str) -> Result<serde_json::Value, AppError>;
}

/// reqwest-backed Tron HTTP client
pub struct HttpTronApi {
    http_client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpTronApi {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("TRON-PRO-API-KEY", key.expose_secret()),
            None => request,
        }
    }

    async fn read(response: reqwest::Response) -> Result<serde_json::Value, AppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "HTTP {}: {}",
                status, body
            ))));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
    } else if e.is_connect() {
        AppError::Blockchain(BlockchainError::Connection(e.to_string()))
    } else {
        AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
    }
}

#[async_trait]
impl TronApi for HttpTronApi {
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let request = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        let response = self.with_key(request).send().await.map_err(map_reqwest_error)?;
        Self::read(response).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value, AppError> {
        let request = self.http_client.get(format!("{}{}", self.base_url, path));
        let response = self.with_key(request).send().await.map_err(map_reqwest_error)?;
        Self::read(response).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct TronBlock {
    #[serde(rename = "blockID", default)]
    block_id: String,
    block_header: Option<TronBlockHeader>,
}

#[derive(Debug, Default, Deserialize)]
struct TronBlockHeader {
    raw_data: TronBlockRaw,
}

#[derive(Debug, Default, Deserialize)]
struct TronBlockRaw {
    #[serde(default)]
    number: u64,
    /// Milliseconds
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TronTransactionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    block_number: u64,
    #[serde(default)]
    fee: Option<u64>,
    #[serde(default)]
    receipt: Option<TronReceipt>,
}

#[derive(Debug, Default, Deserialize)]
struct TronReceipt {
    #[serde(default)]
    energy_usage_total: u64,
    /// Absent for plain TRX transfers
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TronEventPage {
    #[serde(default)]
    data: Vec<RawTronEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerConstantResult {
    #[serde(default)]
    constant_result: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TronAccount {
    #[serde(default)]
    balance: u64,
}

impl TronTransactionInfo {
    fn status(&self) -> TxStatus {
        if self.id.is_none() {
            return TxStatus::Pending;
        }
        match self.receipt.as_ref().and_then(|r| r.result.as_deref()) {
            None | Some("SUCCESS") => TxStatus::Success,
            Some(_) => TxStatus::Failed,
        }
    }
}

/// Tron chain adapter
pub struct TronChainAdapter {
    api: Box<dyn TronApi>,
    decoder: EventLogDecoder,
    config: RpcClientConfig,
}

impl TronChainAdapter {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        decoder: EventLogDecoder,
        config: RpcClientConfig,
    ) -> Result<Self, AppError> {
        let api = HttpTronApi::new(base_url, api_key, config.timeout)?;
        info!(base_url = %base_url, "Created Tron chain adapter");
        Ok(Self {
            api: Box::new(api),
            decoder,
            config,
        })
    }

    /// Create an adapter over a specific API (useful for testing)
    pub fn with_api(api: Box<dyn TronApi>, decoder: EventLogDecoder, config: RpcClientConfig) -> Self {
        Self {
            api,
            decoder,
            config,
        }
    }

    async fn retrying<F, Fut>(&self, what: &str, call: F) -> Result<serde_json::Value, AppError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<serde_json::Value, AppError>> + Send,
    {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, call = %what, "Tron API call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    async fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<R, AppError> {
        let value = self
            .retrying(path, || self.api.post(path, body.clone()))
            .await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!("{}: {}", path, e)))
        })
    }

    async fn transaction_info(&self, tx: &str) -> Result<TronTransactionInfo, AppError> {
        self.post(
            "/wallet/gettransactioninfobyid",
            serde_json::json!({ "value": tx.trim_start_matches("0x") }),
        )
        .await
    }

    async fn transaction_events(&self, tx: &str) -> Result<Vec<RawTronEvent>, AppError> {
        let path = format!(
            "/v1/transactions/{}/events?only_confirmed=false",
            tx.trim_start_matches("0x")
        );
        let value = self.retrying(&path, || self.api.get(&path)).await?;
        let page: TronEventPage = serde_json::from_value(value).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!("events: {}", e)))
        })?;
        Ok(page.data)
    }
}

#[async_trait]
impl ChainAdapter for TronChainAdapter {
    fn chain(&self) -> Chain {
        Chain::Tron
    }

    #[instrument(skip(self))]
    async fn block_number(&self) -> Result<u64, AppError> {
        let block: TronBlock = self
            .post("/wallet/getnowblock", serde_json::json!({}))
            .await?;
        block
            .block_header
            .map(|h| h.raw_data.number)
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidResponse(
                    "getnowblock without header".to_string(),
                ))
            })
    }

    #[instrument(skip(self))]
    async fn receipt_log(&self, tx: &str) -> Result<Receipt, AppError> {
        let info = self.transaction_info(tx).await?;
        let status = info.status();
        if status == TxStatus::Pending {
            return Err(AppError::Blockchain(BlockchainError::NotFound(format!(
                "transaction info for {}",
                tx
            ))));
        }

        let logs = if status == TxStatus::Success {
            let events = self.transaction_events(tx).await?;
            self.decoder.decode(&events)?
        } else {
            Vec::new()
        };

        Ok(Receipt {
            tx_hash: info.id.unwrap_or_else(|| tx.to_string()),
            block_number: info.block_number,
            status,
            logs,
            gas_used: info
                .receipt
                .as_ref()
                .map(|r| r.energy_usage_total)
                .unwrap_or_default(),
            fee: info.fee,
        })
    }

    #[instrument(skip(self))]
    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, AppError> {
        let block: TronBlock = self
            .post(
                "/wallet/getblockbynum",
                serde_json::json!({ "num": block_number }),
            )
            .await?;
        Ok(block.block_header.map(|h| BlockHeader {
            number: h.raw_data.number,
            hash: block.block_id,
            timestamp: h.raw_data.timestamp / 1000,
        }))
    }

    #[instrument(skip(self))]
    async fn transaction_status(&self, tx: &str) -> Result<TxStatus, AppError> {
        Ok(self.transaction_info(tx).await?.status())
    }

    #[instrument(skip(self))]
    async fn balance_of(&self, owner: &str, token: Option<&str>) -> Result<U256, AppError> {
        match token {
            None => {
                let account: TronAccount = self
                    .post(
                        "/wallet/getaccount",
                        serde_json::json!({ "address": address::to_base58(owner)?, "visible": true }),
                    )
                    .await?;
                Ok(U256::from(account.balance))
            }
            Some(token) => {
                let owner_body = address::tron_to_evm_bytes(owner)?;
                let body = serde_json::json!({
                    "owner_address": address::to_hex(owner)?,
                    "contract_address": address::to_hex(token)?,
                    "function_selector": "balanceOf(address)",
                    "parameter": format!("{:0>64}", hex::encode(owner_body)),
                    "visible": false,
                });
                let result: TriggerConstantResult =
                    self.post("/wallet/triggerconstantcontract", body).await?;
                let word = result.constant_result.first().ok_or_else(|| {
                    AppError::Blockchain(BlockchainError::InvalidResponse(
                        "empty constant_result".to_string(),
                    ))
                })?;
                U256::from_str_radix(word, 16).map_err(|e| {
                    AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string()))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_info_status() {
        let unknown = TronTransactionInfo::default();
        assert_eq!(unknown.status(), TxStatus::Pending);

        let transfer = TronTransactionInfo {
            id: Some("ab".to_string()),
            ..Default::default()
        };
        assert_eq!(transfer.status(), TxStatus::Success);

        let reverted = TronTransactionInfo {
            id: Some("ab".to_string()),
            receipt: Some(TronReceipt {
                energy_usage_total: 10,
                result: Some("REVERT".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(reverted.status(), TxStatus::Failed);
    }

    #[test]
    fn test_deserialize_empty_transaction_info() {
        let info: TronTransactionInfo = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(info.status(), TxStatus::Pending);
    }

    #[test]
    fn test_deserialize_block() {
        let block: TronBlock = serde_json::from_value(serde_json::json!({
            "blockID": "0000000003e8abcd",
            "block_header": {"raw_data": {"number": 1000, "timestamp": 1700000000000i64}}
        }))
        .unwrap();
        assert_eq!(block.block_id, "0000000003e8abcd");
        let raw = block.block_header.unwrap().raw_data;
        assert_eq!(raw.number, 1000);
        assert_eq!(raw.timestamp, 1_700_000_000_000);
    }
}
