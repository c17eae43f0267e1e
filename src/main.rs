//! Application entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chain_callback_relayer::app::{AppState, HandlerNaming, HandlerRegistry};
use chain_callback_relayer::config::{AppConfig, CacheBackend};
use chain_callback_relayer::domain::{
    CacheClient, Chain, ChainAdapter, ChainFamily, ContractAddressMap, HealthStatus,
};
use chain_callback_relayer::infra::{
    EventLogDecoder, EventSchemaRegistry, EvmChainAdapter, MemoryCache, PostgresClient,
    PostgresConfig, RedisCache, RpcClientConfig, TronChainAdapter,
};

/// Time allowed for loops to drain after the shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,chain_callback_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Business handlers are registered here, one per contract name.
fn build_registry(naming: HandlerNaming) -> HandlerRegistry {
    HandlerRegistry::new(naming)
}

fn build_adapters(
    config: &AppConfig,
    contracts: &HashMap<Chain, ContractAddressMap>,
) -> Result<HashMap<Chain, Arc<dyn ChainAdapter>>> {
    let rpc_config = RpcClientConfig {
        retry_delay: config.retry_policy().delay,
        ..Default::default()
    };

    let mut adapters: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
    for chain_config in &config.chains {
        let chain = chain_config.chain;
        let adapter: Arc<dyn ChainAdapter> = match chain.family() {
            ChainFamily::Evm => Arc::new(
                EvmChainAdapter::new(chain, &chain_config.rpc_url, rpc_config.clone())
                    .with_context(|| format!("Failed to create {} adapter", chain))?,
            ),
            ChainFamily::Tron => {
                let schemas = match &config.tron_event_abi_dir {
                    Some(dir) => EventSchemaRegistry::from_dir(dir)
                        .with_context(|| format!("Failed to load event ABIs from {}", dir.display()))?,
                    None => {
                        warn!("   ⚠ TRON_EVENT_ABI_DIR not set, Tron events cannot be decoded");
                        EventSchemaRegistry::new()
                    }
                };
                let allow_list = contracts
                    .get(&chain)
                    .cloned()
                    .unwrap_or_else(|| ContractAddressMap::new(chain));
                let decoder = EventLogDecoder::new(allow_list, schemas);
                let missing = decoder.missing_schemas();
                if !missing.is_empty() {
                    anyhow::bail!(
                        "No event ABI for allow-listed Tron contracts: {}",
                        missing.join(", ")
                    );
                }
                let api_key = config
                    .tron_api_key
                    .as_ref()
                    .map(|k| SecretString::from(k.expose_secret().to_string()));
                Arc::new(
                    TronChainAdapter::new(
                        &chain_config.rpc_url,
                        api_key,
                        decoder,
                        rpc_config.clone(),
                    )
                    .context("Failed to create Tron adapter")?,
                )
            }
        };
        info!(
            "   ✓ {} adapter ready ({} contracts, init block {})",
            chain,
            chain_config.contracts.len(),
            chain_config.init_block
        );
        adapters.insert(chain, adapter);
    }
    Ok(adapters)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Chain Callback Relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env().context("Invalid configuration")?;

    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(
        config.database_url.expose_secret(),
        PostgresConfig::default(),
    )
    .await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let cache_client: Arc<dyn CacheClient> = match &config.cache_backend {
        CacheBackend::Redis(url) => {
            let cache = RedisCache::new(url.expose_secret()).await?;
            info!("   ✓ Redis connected");
            Arc::new(cache)
        }
        CacheBackend::Memory => {
            warn!("   ⚠ In-memory cache: dispatch guard and cursors are not shared");
            Arc::new(MemoryCache::new())
        }
    };

    let contracts = config.contract_maps();
    let adapters = build_adapters(&config, &contracts)?;

    let registry = build_registry(HandlerNaming {
        prefix: config.callback_prefix.clone(),
        suffix: config.callback_suffix.clone(),
    });
    if registry.is_empty() {
        warn!("   ⚠ No callback handlers registered, every dispatch will be dropped");
    } else {
        info!("   ✓ Handlers: {}", registry.names().join(", "));
    }

    let (state, receivers) = AppState::new(
        Arc::new(postgres_client),
        cache_client,
        adapters,
        contracts,
        registry,
        config.pipeline_settings(),
    );

    // `chain-callback-relayer rebuild <Chain>` purges a chain and exits
    let args: Vec<String> = std::env::args().collect();
    if let [_, command, chain] = args.as_slice() {
        if command == "rebuild" {
            let chain: Chain = chain.parse().map_err(anyhow::Error::msg)?;
            let cursor = state.pipeline.rebuild(chain).await?;
            info!("🔄 {} rebuilt, scanning resumes at block {}", chain, cursor.next_block());
            return Ok(());
        }
    }

    let health = state.pipeline.health_check().await;
    for (chain, status) in &health.chains {
        if *status != HealthStatus::Healthy {
            warn!("   ⚠ {} RPC unreachable at startup", chain);
        }
    }
    info!("   ✓ Health: {:?}", health.status);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = state.spawn_background(receivers, shutdown_rx);
    info!("🚀 Relayer running ({} background tasks)", handles.len());

    shutdown_signal().await;
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    let drain = async {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Background tasks did not stop within {:?}", SHUTDOWN_GRACE);
    }

    info!("Shutdown complete");
    Ok(())
}
