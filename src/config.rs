//! Process configuration, read once from the environment at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use tracing::info;
use validator::Validate;

use crate::app::{
    GuardConfig, PipelineSettings, ReconcilerConfig, RetryPolicy, SwapConfig, SwapPair,
    WorkerConfig,
};
use crate::domain::{AppError, Chain, ChainFamily, ConfigError, ContractAddressMap};
use crate::infra::blockchain::{address, evm};

/// Connection and scan settings for one chain
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub init_block: u64,
    /// (contract name, address)
    pub contracts: Vec<(String, String)>,
    pub swap_confirmations: u64,
}

#[derive(Debug)]
pub enum CacheBackend {
    Redis(SecretString),
    /// Single-process runs only: guard and cursors are not shared
    Memory,
}

/// Immutable configuration snapshot
#[derive(Debug, Validate)]
pub struct AppConfig {
    #[validate(length(min = 1, message = "at least one chain must be configured"))]
    pub chains: Vec<ChainConfig>,
    pub database_url: SecretString,
    pub cache_backend: CacheBackend,
    pub tron_api_key: Option<SecretString>,
    pub tron_event_abi_dir: Option<PathBuf>,
    #[validate(range(max = 10_000))]
    pub confirmation_threshold: u64,
    pub callback_prefix: String,
    pub callback_suffix: String,
    #[validate(range(min = 1, max = 3600))]
    pub dispatch_ttl_secs: u64,
    #[validate(range(min = 1, max = 20))]
    pub receipt_attempts: u32,
    #[validate(range(max = 60_000))]
    pub rpc_retry_delay_ms: u64,
    #[validate(range(min = 1, max = 256))]
    pub worker_count: usize,
    #[validate(range(min = 1))]
    pub reconcile_interval_secs: u64,
    #[validate(range(min = 1))]
    pub swap_interval_secs: u64,
    #[validate(range(min = 1))]
    pub supervisor_restart_secs: u64,
    pub swap_pairs: Vec<SwapPair>,
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

struct Source<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, e.to_string())),
            None => Ok(default),
        }
    }
}

/// `Name=address,Name2=address2`
fn parse_contracts(chain: Chain, key: &str, raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, addr) = entry
                .split_once('=')
                .ok_or_else(|| invalid(key, format!("expected Name=address, got '{}'", entry)))?;
            let (name, addr) = (name.trim(), addr.trim());
            if name.is_empty() {
                return Err(invalid(key, format!("empty contract name in '{}'", entry)));
            }
            // Tron events are matched in base58 form, so hex entries are converted here
            let canonical = match chain.family() {
                ChainFamily::Evm => evm::validate_address(addr).map(|_| addr.to_string()),
                ChainFamily::Tron => address::to_base58(addr),
            };
            let canonical = canonical.map_err(|e| invalid(key, e.to_string()))?;
            Ok((name.to_string(), canonical))
        })
        .collect()
}

/// `Eth:Heco,Heco:Polygon`
fn parse_swap_pairs(raw: &str) -> Result<Vec<SwapPair>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (from, to) = entry
                .split_once(':')
                .ok_or_else(|| invalid("SWAP_PAIRS", format!("expected From:To, got '{}'", entry)))?;
            let from: Chain = from.parse().map_err(|e: String| invalid("SWAP_PAIRS", e))?;
            let to: Chain = to.parse().map_err(|e: String| invalid("SWAP_PAIRS", e))?;
            if from == to {
                return Err(invalid("SWAP_PAIRS", format!("pair '{}' links a chain to itself", entry)));
            }
            Ok(SwapPair::new(from, to))
        })
        .collect()
}

fn env_prefix(chain: Chain) -> String {
    chain.as_str().to_uppercase()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production, a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup };

        let chain_names = source.required("CHAINS")?;
        let mut chains = Vec::new();
        for name in chain_names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let chain: Chain = name.parse().map_err(|e: String| invalid("CHAINS", e))?;
            if chains.iter().any(|c: &ChainConfig| c.chain == chain) {
                continue;
            }
            let prefix = env_prefix(chain);
            let contracts_key = format!("{}_CONTRACTS", prefix);
            let contracts = match source.optional(&contracts_key) {
                Some(raw) => parse_contracts(chain, &contracts_key, &raw)?,
                None => Vec::new(),
            };
            chains.push(ChainConfig {
                chain,
                rpc_url: source.required(&format!("{}_RPC_URL", prefix))?,
                init_block: source.parsed(&format!("{}_INIT_BLOCK", prefix), 0u64)?,
                contracts,
                swap_confirmations: source.parsed(
                    &format!("{}_CONFIRMATIONS", prefix),
                    chain.default_swap_confirmations(),
                )?,
            });
        }

        let cache_backend = match source.optional("CACHE_BACKEND").as_deref() {
            Some("memory") => CacheBackend::Memory,
            Some("redis") | None => {
                CacheBackend::Redis(SecretString::from(source.required("REDIS_URL")?))
            }
            Some(other) => {
                return Err(invalid("CACHE_BACKEND", format!("unknown backend '{}'", other)).into());
            }
        };

        let swap_pairs = match source.optional("SWAP_PAIRS") {
            Some(raw) => parse_swap_pairs(&raw)?,
            None => Vec::new(),
        };

        let config = Self {
            chains,
            database_url: SecretString::from(source.required("DATABASE_URL")?),
            cache_backend,
            tron_api_key: source.optional("TRON_API_KEY").map(SecretString::from),
            tron_event_abi_dir: source.optional("TRON_EVENT_ABI_DIR").map(PathBuf::from),
            confirmation_threshold: source.parsed("CONFIRMATION_THRESHOLD", 3u64)?,
            callback_prefix: source.optional("CALLBACK_PREFIX").unwrap_or_default(),
            callback_suffix: source
                .optional("CALLBACK_SUFFIX")
                .unwrap_or_else(|| "Callback".to_string()),
            dispatch_ttl_secs: source.parsed("DISPATCH_TTL_SECS", 5u64)?,
            receipt_attempts: source.parsed("RECEIPT_ATTEMPTS", 3u32)?,
            rpc_retry_delay_ms: source.parsed("RPC_RETRY_DELAY_MS", 0u64)?,
            worker_count: source.parsed("WORKER_COUNT", 4usize)?,
            reconcile_interval_secs: source.parsed("RECONCILE_INTERVAL_SECS", 5u64)?,
            swap_interval_secs: source.parsed("SWAP_INTERVAL_SECS", 15u64)?,
            supervisor_restart_secs: source.parsed("SUPERVISOR_RESTART_SECS", 5u64)?,
            swap_pairs,
        };

        config
            .validate()
            .map_err(|e| invalid("config", e.to_string()))?;

        for pair in &config.swap_pairs {
            if !config.chains.iter().any(|c| c.chain == pair.to) {
                return Err(invalid(
                    "SWAP_PAIRS",
                    format!("destination {} is not in CHAINS", pair.to),
                )
                .into());
            }
        }

        info!(
            chains = config.chains.len(),
            swap_pairs = config.swap_pairs.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    #[must_use]
    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }

    #[must_use]
    pub fn contract_maps(&self) -> HashMap<Chain, ContractAddressMap> {
        self.chains
            .iter()
            .map(|c| {
                let pairs = c.contracts.iter().map(|(name, addr)| (addr.as_str(), name.clone()));
                (c.chain, ContractAddressMap::from_pairs(c.chain, pairs))
            })
            .collect()
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.receipt_attempts,
            delay: Duration::from_millis(self.rpc_retry_delay_ms),
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let defaults = PipelineSettings::default();
        PipelineSettings {
            confirmation_threshold: self.confirmation_threshold,
            retry: self.retry_policy(),
            guard: GuardConfig {
                ttl: Duration::from_secs(self.dispatch_ttl_secs),
                ..Default::default()
            },
            worker: WorkerConfig {
                workers_per_queue: self.worker_count,
                ..Default::default()
            },
            reconciler: ReconcilerConfig {
                interval: Duration::from_secs(self.reconcile_interval_secs),
                ..Default::default()
            },
            swap: SwapConfig {
                interval: Duration::from_secs(self.swap_interval_secs),
                thresholds: self
                    .chains
                    .iter()
                    .map(|c| (c.chain, c.swap_confirmations))
                    .collect(),
                ..Default::default()
            },
            swap_pairs: self.swap_pairs.clone(),
            init_blocks: self.chains.iter().map(|c| (c.chain, c.init_block)).collect(),
            restart_delay: Duration::from_secs(self.supervisor_restart_secs),
            ..defaults
        }
    }
}
