//! Application state: the wired component graph and its background loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::confirmation::{ConfirmationGate, DEFAULT_CONFIRMATION_THRESHOLD};
use super::cursor::ScanCursorStore;
use super::guard::{GuardConfig, IdempotencyGuard, ResultCache};
use super::reconciler::{ReconcilerConfig, StatusReconciler};
use super::resolver::{ReceiptResolver, RetryPolicy};
use super::router::{CallbackRouter, DEFAULT_HANDLER_TIMEOUT, HandlerRegistry};
use super::service::TransactionPipeline;
use super::supervisor::{DEFAULT_RESTART_DELAY, spawn_supervised};
use super::swap::{SwapConfig, SwapCorrelator, SwapPair};
use super::worker::{CallbackQueue, QueueReceivers, WorkerConfig, spawn_workers};
use crate::domain::{CacheClient, Chain, ChainAdapter, ContractAddressMap, DatabaseClient};

/// Tunables for the whole pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confirmation_threshold: u64,
    pub retry: RetryPolicy,
    pub guard: GuardConfig,
    pub worker: WorkerConfig,
    pub reconciler: ReconcilerConfig,
    pub swap: SwapConfig,
    pub swap_pairs: Vec<SwapPair>,
    pub init_blocks: HashMap<Chain, u64>,
    pub header_cache_ttl: Duration,
    pub handler_timeout: Duration,
    pub restart_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            retry: RetryPolicy::default(),
            guard: GuardConfig::default(),
            worker: WorkerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            swap: SwapConfig::default(),
            swap_pairs: Vec::new(),
            init_blocks: HashMap::new(),
            header_cache_ttl: Duration::from_secs(60),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TransactionPipeline>,
    pub reconciler: Arc<StatusReconciler>,
    pub swap: Option<Arc<SwapCorrelator>>,
    pub guard: Arc<IdempotencyGuard>,
    pub router: Arc<CallbackRouter>,
    pub queue: CallbackQueue,
    pub db_client: Arc<dyn DatabaseClient>,
    pub cache_client: Arc<dyn CacheClient>,
    pub settings: PipelineSettings,
}

impl AppState {
    /// Wire every component. The returned receivers feed [`AppState::spawn_background`].
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        cache_client: Arc<dyn CacheClient>,
        adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
        contracts: HashMap<Chain, ContractAddressMap>,
        registry: HandlerRegistry,
        settings: PipelineSettings,
    ) -> (Self, QueueReceivers) {
        let mut chains: Vec<Chain> = adapters.keys().copied().collect();
        chains.sort_by_key(|c| c.as_str());
        let (queue, receivers) = CallbackQueue::new(&chains, settings.worker.queue_capacity);

        let resolver = ReceiptResolver::new(
            ConfirmationGate::new(settings.confirmation_threshold),
            settings.retry,
        )
        .with_header_cache(ResultCache::new(
            Arc::clone(&cache_client),
            settings.header_cache_ttl,
        ));

        let cursors = Arc::new(ScanCursorStore::new(
            Arc::clone(&cache_client),
            Arc::clone(&db_client),
            settings.init_blocks.clone(),
        ));

        let pipeline = Arc::new(TransactionPipeline::new(
            adapters.clone(),
            contracts,
            Arc::new(resolver),
            queue.clone(),
            Arc::clone(&db_client),
            Arc::clone(&cache_client),
            cursors,
        ));

        let reconciler = Arc::new(StatusReconciler::new(
            Arc::clone(&pipeline),
            Arc::clone(&db_client),
            settings.reconciler.clone(),
        ));

        let swap = if settings.swap_pairs.is_empty() {
            None
        } else {
            Some(Arc::new(SwapCorrelator::new(
                Arc::clone(&db_client),
                adapters,
                &settings.swap_pairs,
                settings.swap.clone(),
            )))
        };

        let guard = Arc::new(IdempotencyGuard::new(
            Arc::clone(&cache_client),
            settings.guard.clone(),
        ));
        let router = Arc::new(
            CallbackRouter::new(registry, Arc::clone(&db_client))
                .with_handler_timeout(settings.handler_timeout),
        );

        let state = Self {
            pipeline,
            reconciler,
            swap,
            guard,
            router,
            queue,
            db_client,
            cache_client,
            settings,
        };
        (state, receivers)
    }

    /// Start queue workers and one supervised loop per reconciler and correlator.
    #[must_use]
    pub fn spawn_background(
        &self,
        receivers: QueueReceivers,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = spawn_workers(
            receivers,
            Arc::clone(&self.guard),
            Arc::clone(&self.router),
            Arc::clone(&self.db_client),
            &self.settings.worker,
            shutdown.clone(),
        );

        for chain in self.pipeline.chains() {
            let reconciler = Arc::clone(&self.reconciler);
            let loop_shutdown = shutdown.clone();
            handles.push(spawn_supervised(
                format!("reconciler:{}", chain),
                self.settings.restart_delay,
                shutdown.clone(),
                move || Arc::clone(&reconciler).run(chain, loop_shutdown.clone()),
            ));
        }

        if let Some(swap) = &self.swap {
            let swap = Arc::clone(swap);
            let loop_shutdown = shutdown.clone();
            handles.push(spawn_supervised(
                "swap_correlator",
                self.settings.restart_delay,
                shutdown,
                move || Arc::clone(&swap).run(loop_shutdown.clone()),
            ));
        }

        info!(tasks = handles.len(), "Background tasks started");
        handles
    }
}
