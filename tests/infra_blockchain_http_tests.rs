//! HTTP-based integration tests for the EVM and Tron chain adapters.
//!
//! Uses `wiremock` to stand in for JSON-RPC nodes and the Tron full node /
//! event API.

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use chain_callback_relayer::domain::{AppError, BlockchainError, Chain, ChainAdapter, TxStatus};

// ============================================================================
// EVM JSON-RPC ADAPTER TESTS
// ============================================================================

mod evm_adapter_tests {
    use super::*;
    use chain_callback_relayer::infra::{EvmChainAdapter, RpcClientConfig};
    use std::time::Duration;

    const TX: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

    fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    fn adapter(server: &MockServer) -> EvmChainAdapter {
        EvmChainAdapter::new(
            Chain::Heco,
            &server.uri(),
            RpcClientConfig {
                timeout: Duration::from_secs(2),
                max_retries: 2,
                retry_delay: Duration::ZERO,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_block_number_parses_hex_quantity() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(rpc_result(json!("0x1b4")))
            .mount(&mock_server)
            .await;

        assert_eq!(adapter(&mock_server).block_number().await.unwrap(), 436);
    }

    #[tokio::test]
    async fn test_receipt_log_normalizes_receipt() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(
                json!({"method": "eth_getTransactionReceipt", "params": [TX]}),
            ))
            .respond_with(rpc_result(json!({
                "transactionHash": TX,
                "blockNumber": "0x64",
                "status": "0x1",
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x2",
                "logs": [{
                    "address": "0x00000000000000000000000000000000000000C1",
                    "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                    "data": "0x"
                }]
            })))
            .mount(&mock_server)
            .await;

        let receipt = adapter(&mock_server).receipt_log(TX).await.unwrap();
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.fee, Some(42_000));
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(
            receipt.logs[0].address,
            "0x00000000000000000000000000000000000000c1"
        );
    }

    #[tokio::test]
    async fn test_receipt_log_null_result_is_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&mock_server)
            .await;

        let adapter = adapter(&mock_server);
        let result = adapter.receipt_log(TX).await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::NotFound(_)))
        ));
        assert_eq!(
            adapter.transaction_status(TX).await.unwrap(),
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_reverted_receipt_reports_failed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(rpc_result(json!({
                "transactionHash": TX,
                "blockNumber": "0x64",
                "status": "0x0",
                "logs": []
            })))
            .mount(&mock_server)
            .await;

        let adapter = adapter(&mock_server);
        assert_eq!(
            adapter.transaction_status(TX).await.unwrap(),
            TxStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_block_header_timestamp() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(
                json!({"method": "eth_getBlockByNumber", "params": ["0x64", false]}),
            ))
            .respond_with(rpc_result(json!({
                "number": "0x64",
                "hash": "0xabcdef",
                "timestamp": "0x6553f100"
            })))
            .mount(&mock_server)
            .await;

        let header = adapter(&mock_server)
            .block_header(100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.hash, "0xabcdef");
        assert_eq!(header.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_unknown_block_header_is_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&mock_server)
            .await;

        assert!(
            adapter(&mock_server)
                .block_header(999_999)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_after_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32000, "message": "header not found"}
            })))
            // initial attempt plus two retries
            .expect(3)
            .mount(&mock_server)
            .await;

        let result = adapter(&mock_server).block_number().await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::RpcError(_)))
        ));
    }

    #[tokio::test]
    async fn test_resolver_retry_budget_is_the_only_retry_layer() {
        use chain_callback_relayer::app::{ConfirmationGate, ReceiptResolver, RetryPolicy};
        use chain_callback_relayer::domain::ChainAdapter;
        use std::sync::Arc;

        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32603, "message": "internal error"}
            })))
            .expect(u64::from(RetryPolicy::default().attempts))
            .mount(&mock_server)
            .await;

        let adapter: Arc<dyn ChainAdapter> = Arc::new(
            EvmChainAdapter::new(Chain::Heco, &mock_server.uri(), RpcClientConfig::default())
                .unwrap(),
        );
        let resolver = ReceiptResolver::new(ConfirmationGate::new(3), RetryPolicy::default());

        let result = resolver.resolve(&adapter, "0xabc").await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::RpcError(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_check_fails_on_unreachable_node() {
        let adapter = EvmChainAdapter::new(
            Chain::Eth,
            "http://127.0.0.1:1",
            RpcClientConfig {
                timeout: Duration::from_millis(500),
                max_retries: 1,
                retry_delay: Duration::ZERO,
            },
        )
        .unwrap();
        assert!(adapter.health_check().await.is_err());
    }
}

// ============================================================================
// TRON ADAPTER TESTS
// ============================================================================

mod tron_adapter_tests {
    use super::*;
    use chain_callback_relayer::domain::ContractAddressMap;
    use chain_callback_relayer::infra::{
        EventLogDecoder, EventSchemaRegistry, RpcClientConfig, TronChainAdapter,
    };
    use secrecy::SecretString;
    use std::time::Duration;

    const TX: &str = "7c2d4206c03a883dd9066d620335dc1be272a8dc733cfa3f6d10308faa37facc";
    const LAND_RESOURCE: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    const TRANSFER_ABI: &str = r#"[{
        "type": "event",
        "name": "Transfer",
        "anonymous": false,
        "inputs": [
            {"name": "from", "type": "address", "indexed": true},
            {"name": "to", "type": "address", "indexed": true},
            {"name": "value", "type": "uint256", "indexed": false}
        ]
    }]"#;

    fn adapter(server: &MockServer, api_key: Option<&str>) -> TronChainAdapter {
        let contracts =
            ContractAddressMap::from_pairs(Chain::Tron, [(LAND_RESOURCE, "LandResource")]);
        let mut schemas = EventSchemaRegistry::new();
        schemas.insert_json("LandResource", TRANSFER_ABI).unwrap();

        TronChainAdapter::new(
            &server.uri(),
            api_key.map(|k| SecretString::from(k.to_string())),
            EventLogDecoder::new(contracts, schemas),
            RpcClientConfig {
                timeout: Duration::from_secs(2),
                max_retries: 2,
                retry_delay: Duration::ZERO,
            },
        )
        .unwrap()
    }

    async fn mount_transaction_info(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/wallet/gettransactioninfobyid"))
            .and(body_partial_json(json!({"value": TX})))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_block_number_from_now_block() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/wallet/getnowblock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blockID": "0000000003a1b2c3",
                "block_header": {"raw_data": {"number": 61_000_000, "timestamp": 1_700_000_000_000_i64}}
            })))
            .mount(&mock_server)
            .await;

        assert_eq!(
            adapter(&mock_server, None).block_number().await.unwrap(),
            61_000_000
        );
    }

    #[tokio::test]
    async fn test_api_key_header_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/wallet/getnowblock"))
            .and(header("TRON-PRO-API-KEY", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blockID": "00",
                "block_header": {"raw_data": {"number": 5, "timestamp": 0}}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert_eq!(
            adapter(&mock_server, Some("test-key"))
                .block_number()
                .await
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_block_header_converts_milliseconds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/wallet/getblockbynum"))
            .and(body_partial_json(json!({"num": 100})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blockID": "0000000000000064abc",
                "block_header": {"raw_data": {"number": 100, "timestamp": 1_700_000_000_500_i64}}
            })))
            .mount(&mock_server)
            .await;

        let header = adapter(&mock_server, None)
            .block_header(100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_unknown_block_is_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/wallet/getblockbynum"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        assert!(
            adapter(&mock_server, None)
                .block_header(1)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unconfirmed_transaction_is_not_found() {
        let mock_server = MockServer::start().await;
        mount_transaction_info(&mock_server, json!({})).await;

        let adapter = adapter(&mock_server, None);
        assert!(matches!(
            adapter.receipt_log(TX).await,
            Err(AppError::Blockchain(BlockchainError::NotFound(_)))
        ));
        assert_eq!(
            adapter.transaction_status(TX).await.unwrap(),
            TxStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_receipt_log_rebuilds_evm_logs_from_events() {
        let mock_server = MockServer::start().await;
        mount_transaction_info(
            &mock_server,
            json!({
                "id": TX,
                "blockNumber": 61_000_000,
                "fee": 345_000,
                "receipt": {"energy_usage_total": 14_650, "result": "SUCCESS"}
            }),
        )
        .await;

        Mock::given(method("GET"))
            .and(path(format!("/v1/transactions/{}/events", TX)))
            .and(query_param("only_confirmed", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    {
                        "contract_address": "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf",
                        "event_name": "Approval",
                        "event_index": 0,
                        "result": {}
                    },
                    {
                        "contract_address": LAND_RESOURCE,
                        "event_name": "Transfer",
                        "event_index": 1,
                        "block_number": 61_000_000,
                        "result": {
                            "from": "0x00000000000000000000000000000000000000aa",
                            "to": "0x00000000000000000000000000000000000000bb",
                            "value": "1000"
                        }
                    }
                ]
            })))
            .mount(&mock_server)
            .await;

        let receipt = adapter(&mock_server, None).receipt_log(TX).await.unwrap();
        assert_eq!(receipt.block_number, 61_000_000);
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(receipt.gas_used, 14_650);
        assert_eq!(receipt.fee, Some(345_000));

        assert_eq!(receipt.logs.len(), 1);
        let log = &receipt.logs[0];
        assert_eq!(log.address, LAND_RESOURCE);
        assert_eq!(
            log.topics[0],
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(
            log.data,
            "0x00000000000000000000000000000000000000000000000000000000000003e8"
        );
    }

    #[tokio::test]
    async fn test_reverted_transaction_skips_event_lookup() {
        let mock_server = MockServer::start().await;
        mount_transaction_info(
            &mock_server,
            json!({
                "id": TX,
                "blockNumber": 42,
                "receipt": {"result": "REVERT"}
            }),
        )
        .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let receipt = adapter(&mock_server, None).receipt_log(TX).await.unwrap();
        assert_eq!(receipt.status, TxStatus::Failed);
        assert!(receipt.logs.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let result = adapter(&mock_server, None).block_number().await;
        assert!(matches!(result, Err(AppError::Blockchain(_))));
    }
}
