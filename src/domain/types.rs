//! Domain types for chain transactions, callbacks, and swap tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chain family, decides which RPC surface an adapter speaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    /// Ethereum JSON-RPC compatible chains
    Evm,
    /// Tron full node HTTP API plus TronGrid event query
    Tron,
}

/// Supported chains
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    Eth,
    Heco,
    Polygon,
    Crab,
    Tron,
}

impl Chain {
    pub const ALL: [Chain; 5] = [
        Chain::Eth,
        Chain::Heco,
        Chain::Polygon,
        Chain::Crab,
        Chain::Tron,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eth => "Eth",
            Self::Heco => "Heco",
            Self::Polygon => "Polygon",
            Self::Crab => "Crab",
            Self::Tron => "Tron",
        }
    }

    #[must_use]
    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Tron => ChainFamily::Tron,
            _ => ChainFamily::Evm,
        }
    }

    /// Confirmations after which a bridge transfer landing on this chain is final
    #[must_use]
    pub fn default_swap_confirmations(&self) -> u64 {
        match self {
            Self::Eth => 12,
            Self::Heco => 20,
            Self::Polygon => 64,
            Self::Crab => 10,
            Self::Tron => 19,
        }
    }

    /// Name of the per-chain callback queue
    #[must_use]
    pub fn queue_name(&self) -> String {
        format!("{}_callback", self.as_str().to_lowercase())
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eth" | "ethereum" => Ok(Self::Eth),
            "heco" => Ok(Self::Heco),
            "polygon" => Ok(Self::Polygon),
            "crab" => Ok(Self::Crab),
            "tron" => Ok(Self::Tron),
            _ => Err(format!("Invalid chain: {}", s)),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of an observed chain transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Observed but not yet final
    #[default]
    Pending,
    /// Executed successfully on chain
    Success,
    /// Reverted, or succeeded without any logs
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses never transition again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// EVM-shaped event log. Tron events are re-encoded into this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Log {
    /// Emitting contract, in the chain's native address format
    pub address: String,
    /// `0x`-prefixed 32-byte topics, topic0 is the event selector
    pub topics: Vec<String>,
    /// `0x`-prefixed ABI-encoded non-indexed fields
    pub data: String,
}

/// Normalized transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub status: TxStatus,
    pub logs: Vec<Log>,
    /// Gas (EVM) or energy (Tron) consumed
    pub gas_used: u64,
    /// Fee paid in the chain's smallest native unit, when the node reports it
    pub fee: Option<u64>,
}

/// Block header subset the pipeline needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// A transaction observed on a chain, keyed by (chain, tx_hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainTransaction {
    pub chain: Chain,
    pub tx_hash: String,
    /// Resolved from the contract address map once the receipt is final
    pub contract_name: Option<String>,
    pub logs: Vec<Log>,
    pub status: TxStatus,
    pub block_number: u64,
    /// Unix seconds, zero until the block header is known
    pub block_timestamp: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainTransaction {
    /// A freshly observed transaction that still needs confirmations
    #[must_use]
    pub fn pending(chain: Chain, tx_hash: impl Into<String>, block_number: u64) -> Self {
        let now = Utc::now();
        Self {
            chain,
            tx_hash: tx_hash.into(),
            contract_name: None,
            logs: Vec::new(),
            status: TxStatus::Pending,
            block_number,
            block_timestamp: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted per-chain scan progress
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanCursor {
    pub chain: Chain,
    /// Last block height handed off downstream
    pub last_block: u64,
    /// Configured starting height for a fresh or rebuilt chain
    pub init_block: u64,
}

impl ScanCursor {
    /// Next height the scanner should look at
    #[must_use]
    pub fn next_block(&self) -> u64 {
        if self.last_block < self.init_block {
            self.init_block
        } else {
            self.last_block + 1
        }
    }
}

/// Queue message consumed by the callback router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackPayload {
    pub tx: String,
    pub chain: Chain,
    pub contract_name: String,
    pub block_timestamp: i64,
    pub receipt: Receipt,
}

impl CallbackPayload {
    /// Idempotency key for one (tx, contract) dispatch
    #[must_use]
    pub fn dispatch_key(&self) -> String {
        format!("dispatch:{}:{}", self.tx, self.contract_name)
    }
}

/// Append-only record of a failed handler invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackError {
    pub id: Uuid,
    pub tx: String,
    pub chain: Chain,
    pub contract_name: String,
    pub handler_name: String,
    pub error: String,
    /// Receipt snapshot so the dispatch can be replayed offline
    pub receipt: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CallbackError {
    #[must_use]
    pub fn new(payload: &CallbackPayload, handler_name: &str, error: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx: payload.tx.clone(),
            chain: payload.chain,
            contract_name: payload.contract_name.clone(),
            handler_name: handler_name.to_string(),
            error: error.to_string(),
            receipt: serde_json::to_value(&payload.receipt).unwrap_or(serde_json::Value::Null),
            created_at: Utc::now(),
        }
    }
}

/// Status of a cross-chain swap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    #[default]
    Pending,
    /// Destination transaction reached the chain's confirmation threshold
    Confirmed,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
        }
    }
}

impl std::str::FromStr for SwapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(format!("Invalid swap status: {}", s)),
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bridge transaction tracked across a chain pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwapTransaction {
    pub from_chain: Chain,
    pub to_chain: Chain,
    /// Transaction hash on the destination chain
    pub tx_hash: String,
    pub confirmations: u64,
    /// Chain the confirmation depth was measured on
    pub chain_label: Option<String>,
    pub status: SwapStatus,
    pub updated_at: DateTime<Utc>,
}

/// Confirmation depth lookup result.
///
/// `Unknown` means the lookup failed or the transaction is not on chain yet;
/// `Blocks(0)` means it was found in the current head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDepth {
    Unknown,
    Blocks(u64),
}

/// Static address to contract name table for one chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractAddressMap {
    family: Option<ChainFamily>,
    by_address: HashMap<String, String>,
}

impl ContractAddressMap {
    #[must_use]
    pub fn new(chain: Chain) -> Self {
        Self {
            family: Some(chain.family()),
            by_address: HashMap::new(),
        }
    }

    #[must_use]
    pub fn from_pairs<I, A, N>(chain: Chain, pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, N)>,
        A: AsRef<str>,
        N: Into<String>,
    {
        let mut map = Self::new(chain);
        for (address, name) in pairs {
            map.insert(address.as_ref(), name);
        }
        map
    }

    pub fn insert(&mut self, address: &str, name: impl Into<String>) {
        let key = self.normalize(address);
        self.by_address.insert(key, name.into());
    }

    /// Contract name registered for an address
    #[must_use]
    pub fn name_of(&self, address: &str) -> Option<&str> {
        self.by_address
            .get(&self.normalize(address))
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.by_address.contains_key(&self.normalize(address))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.by_address.keys().map(String::as_str)
    }

    /// Distinct contract names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_address.values().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Distinct mapped contracts among the receipt logs, in log order
    #[must_use]
    pub fn resolve_logs(&self, logs: &[Log]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in logs.iter().filter_map(|log| self.name_of(&log.address)) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    // EVM addresses are case-insensitive hex; Tron base58 is case-sensitive.
    fn normalize(&self, address: &str) -> String {
        match self.family {
            Some(ChainFamily::Tron) => address.trim().to_string(),
            _ => address.trim().to_lowercase(),
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some chains unreachable but the core is functional
    Degraded,
    /// Database or cache unavailable
    Unhealthy,
}

/// Health report across the pipeline's collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub cache: HealthStatus,
    pub chains: Vec<(Chain, HealthStatus)>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(
        database: HealthStatus,
        cache: HealthStatus,
        chains: Vec<(Chain, HealthStatus)>,
    ) -> Self {
        let any_chain_down = chains.iter().any(|(_, s)| *s != HealthStatus::Healthy);
        let status = match (database, cache) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ if any_chain_down => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        Self {
            status,
            database,
            cache,
            chains,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
