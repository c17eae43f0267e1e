//! Per-chain callback queues drained by a pool of workers.
//!
//! A transaction stays Pending in the store while its payloads sit in a
//! queue. The worker that routes the last of them persists Success, so a
//! payload lost with the process leaves a Pending row the reconciler picks up.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::guard::{Guarded, IdempotencyGuard};
use super::router::{CallbackRouter, RouteOutcome};
use crate::domain::{AppError, CallbackPayload, Chain, DatabaseClient, TxStatus};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent workers per chain queue
    pub workers_per_queue: usize,
    /// Bounded capacity of each queue
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers_per_queue: 4,
            queue_capacity: 1024,
        }
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<CallbackPayload>>>;

#[derive(Debug)]
struct InFlightEntry {
    remaining: usize,
    all_routed: bool,
    contract_name: String,
}

/// Last payload of a transaction has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// Every payload reached the router
    pub all_routed: bool,
    /// Contract recorded on the transaction row
    pub contract_name: String,
}

/// Transactions with payloads queued or being routed in this process
#[derive(Clone, Default)]
pub struct InFlight {
    entries: Arc<DashMap<(Chain, String), InFlightEntry>>,
}

impl InFlight {
    #[must_use]
    pub fn contains(&self, chain: Chain, tx: &str) -> bool {
        self.entries.contains_key(&(chain, tx.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track `count` payloads for `tx`. `false` when it is already tracked.
    fn begin(&self, chain: Chain, tx: &str, count: usize, contract_name: &str) -> bool {
        match self.entries.entry((chain, tx.to_string())) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(InFlightEntry {
                    remaining: count,
                    all_routed: true,
                    contract_name: contract_name.to_string(),
                });
                true
            }
        }
    }

    /// Account for one handled payload; returns the summary once none remain.
    ///
    /// The entry stays tracked until [`InFlight::release`] so the row can be
    /// persisted before the transaction looks idle.
    pub fn finish(&self, chain: Chain, tx: &str, routed: bool) -> Option<Completed> {
        let mut entry = self.entries.get_mut(&(chain, tx.to_string()))?;
        if entry.remaining == 0 {
            return None;
        }
        entry.remaining -= 1;
        entry.all_routed &= routed;
        (entry.remaining == 0).then(|| Completed {
            all_routed: entry.all_routed,
            contract_name: entry.contract_name.clone(),
        })
    }

    pub fn release(&self, chain: Chain, tx: &str) {
        self.entries.remove(&(chain, tx.to_string()));
    }
}

/// Producer side of the named per-chain queues
#[derive(Clone)]
pub struct CallbackQueue {
    senders: HashMap<String, mpsc::Sender<CallbackPayload>>,
    in_flight: InFlight,
}

/// Consumer side, handed to [`spawn_workers`]
pub struct QueueReceivers {
    receivers: Vec<(String, SharedReceiver)>,
    in_flight: InFlight,
}

impl QueueReceivers {
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.receivers.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl CallbackQueue {
    /// One queue per chain, named by [`Chain::queue_name`]
    #[must_use]
    pub fn new(chains: &[Chain], capacity: usize) -> (Self, QueueReceivers) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for chain in chains {
            let name = chain.queue_name();
            if senders.contains_key(&name) {
                continue;
            }
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.insert(name.clone(), tx);
            receivers.push((name, Arc::new(Mutex::new(rx))));
        }
        let in_flight = InFlight::default();
        (
            Self {
                senders,
                in_flight: in_flight.clone(),
            },
            QueueReceivers {
                receivers,
                in_flight,
            },
        )
    }

    #[must_use]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Enqueue onto a named queue
    pub async fn enqueue(&self, queue_name: &str, payload: CallbackPayload) -> Result<(), AppError> {
        let sender = self
            .senders
            .get(queue_name)
            .ok_or_else(|| AppError::Queue(format!("unknown queue {}", queue_name)))?;
        sender
            .send(payload)
            .await
            .map_err(|_| AppError::Queue(format!("queue {} is closed", queue_name)))?;
        debug!(queue = %queue_name, "Payload enqueued");
        Ok(())
    }

    /// Enqueue onto the payload's chain queue
    pub async fn enqueue_for_chain(&self, payload: CallbackPayload) -> Result<(), AppError> {
        let name = payload.chain.queue_name();
        self.enqueue(&name, payload).await
    }

    /// Queue every payload of one transaction and track it until routed.
    ///
    /// Returns `false` without queueing when the transaction is already in
    /// flight or there is nothing to send. The first payload's contract is
    /// the one recorded on the transaction row.
    pub async fn dispatch(
        &self,
        chain: Chain,
        tx: &str,
        payloads: Vec<CallbackPayload>,
    ) -> Result<bool, AppError> {
        let Some(first) = payloads.first() else {
            return Ok(false);
        };
        let total = payloads.len();
        if !self.in_flight.begin(chain, tx, total, &first.contract_name) {
            return Ok(false);
        }

        for (sent, payload) in payloads.into_iter().enumerate() {
            if let Err(e) = self.enqueue_for_chain(payload).await {
                for _ in sent..total {
                    if self.in_flight.finish(chain, tx, false).is_some() {
                        self.in_flight.release(chain, tx);
                    }
                }
                return Err(e);
            }
        }
        Ok(true)
    }
}

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Routed(RouteOutcome),
    /// The dispatch record was held; the message was dropped
    Duplicate,
}

/// Route one payload under the idempotency guard.
///
/// A failed route releases the dispatch record so a redelivery can retry at once.
pub async fn deliver(
    guard: &IdempotencyGuard,
    router: &CallbackRouter,
    payload: &CallbackPayload,
) -> Result<Delivery, AppError> {
    let key = payload.dispatch_key();
    let guarded = guard
        .run(&key, || async {
            match router.route(payload).await {
                failed @ RouteOutcome::Failed { .. } => Err(failed),
                outcome => Ok(outcome),
            }
        })
        .await?;

    Ok(match guarded {
        Guarded::Executed(Ok(outcome)) | Guarded::Executed(Err(outcome)) => {
            Delivery::Routed(outcome)
        }
        Guarded::Skipped => Delivery::Duplicate,
    })
}

/// Spawn `workers_per_queue` workers on every queue.
///
/// Once the shutdown flag flips to `true`, workers drain what is already
/// queued and stop.
#[must_use]
pub fn spawn_workers(
    receivers: QueueReceivers,
    guard: Arc<IdempotencyGuard>,
    router: Arc<CallbackRouter>,
    db: Arc<dyn DatabaseClient>,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for (queue, rx) in receivers.receivers {
        for index in 0..config.workers_per_queue.max(1) {
            let worker = Worker {
                queue: queue.clone(),
                index,
                rx: Arc::clone(&rx),
                guard: Arc::clone(&guard),
                router: Arc::clone(&router),
                db: Arc::clone(&db),
                in_flight: receivers.in_flight.clone(),
            };
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
        }
        info!(queue = %queue, workers = config.workers_per_queue.max(1), "Queue workers started");
    }
    handles
}

struct Worker {
    queue: String,
    index: usize,
    rx: SharedReceiver,
    guard: Arc<IdempotencyGuard>,
    router: Arc<CallbackRouter>,
    db: Arc<dyn DatabaseClient>,
    in_flight: InFlight,
}

impl Worker {
    async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<CallbackPayload> {
        let mut rx = self.rx.lock().await;
        loop {
            if *shutdown.borrow() {
                return rx.try_recv().ok();
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return rx.try_recv().ok();
                    }
                }
                payload = rx.recv() => return payload,
            }
        }
    }

    async fn complete(&self, payload: &CallbackPayload, routed: bool) {
        let Some(done) = self.in_flight.finish(payload.chain, &payload.tx, routed) else {
            return;
        };
        if done.all_routed {
            self.persist(payload, &done.contract_name).await;
        } else {
            warn!(queue = %self.queue, tx = %payload.tx, "Dispatch incomplete, transaction left pending");
        }
        self.in_flight.release(payload.chain, &payload.tx);
    }

    async fn persist(&self, payload: &CallbackPayload, contract_name: &str) {
        let receipt = &payload.receipt;
        match self
            .db
            .finalize_transaction(
                payload.chain,
                &payload.tx,
                TxStatus::Success,
                Some(contract_name),
                &receipt.logs,
                receipt.block_number,
                payload.block_timestamp,
            )
            .await
        {
            Ok(true) => info!(queue = %self.queue, tx = %payload.tx, "Transaction dispatched"),
            Ok(false) => debug!(queue = %self.queue, tx = %payload.tx, "Transaction already final"),
            Err(e) => {
                error!(queue = %self.queue, tx = %payload.tx, error = ?e, "Failed to persist dispatched transaction")
            }
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(queue = %self.queue, worker = self.index, "Worker started");
        while let Some(payload) = self.next(&mut shutdown).await {
            let routed = match deliver(&self.guard, &self.router, &payload).await {
                Ok(Delivery::Routed(outcome)) => {
                    debug!(queue = %self.queue, tx = %payload.tx, outcome = ?outcome, "Message consumed");
                    true
                }
                Ok(Delivery::Duplicate) => {
                    info!(queue = %self.queue, tx = %payload.tx, contract = %payload.contract_name, "Duplicate delivery skipped");
                    false
                }
                Err(e) => {
                    error!(queue = %self.queue, tx = %payload.tx, contract = %payload.contract_name, error = ?e, "Dispatch guard unavailable");
                    false
                }
            };
            self.complete(&payload, routed).await;
        }
        warn!(queue = %self.queue, worker = self.index, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{GuardConfig, HandlerNaming, HandlerRegistry};
    use crate::domain::ChainTransaction;
    use crate::infra::MemoryCache;
    use crate::test_utils::{MockDatabaseClient, RecordingHandler, sample_payload};
    use std::time::Duration;

    #[test]
    fn test_in_flight_completes_after_last_payload() {
        let in_flight = InFlight::default();
        assert!(in_flight.begin(Chain::Heco, "0xabc", 2, "CraftBase"));
        assert!(!in_flight.begin(Chain::Heco, "0xabc", 1, "CraftBase"));
        assert!(in_flight.contains(Chain::Heco, "0xabc"));

        assert_eq!(in_flight.finish(Chain::Heco, "0xabc", true), None);
        assert_eq!(
            in_flight.finish(Chain::Heco, "0xabc", false),
            Some(Completed {
                all_routed: false,
                contract_name: "CraftBase".to_string()
            })
        );
        assert!(in_flight.contains(Chain::Heco, "0xabc"));
        assert_eq!(in_flight.finish(Chain::Heco, "0xabc", true), None);

        in_flight.release(Chain::Heco, "0xabc");
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_to_closed_queue_releases_tracking() {
        let (queue, receivers) = CallbackQueue::new(&[Chain::Heco], 4);
        drop(receivers);

        let result = queue
            .dispatch(Chain::Heco, "0xabc", vec![sample_payload("CraftBase")])
            .await;
        assert!(matches!(result, Err(AppError::Queue(_))));
        assert!(!queue.in_flight().contains(Chain::Heco, "0xabc"));
    }

    #[tokio::test]
    async fn test_workers_drain_queue_on_shutdown() {
        let db = Arc::new(MockDatabaseClient::new());
        db.insert_chain_transaction(&ChainTransaction::pending(Chain::Heco, "0xabc", 100))
            .await
            .unwrap();

        let handler = Arc::new(RecordingHandler::new());
        let registry = HandlerRegistry::new(HandlerNaming::default())
            .with_handler("CraftBase", Arc::clone(&handler) as _)
            .with_handler("LandResource", Arc::clone(&handler) as _);
        let router = Arc::new(CallbackRouter::new(registry, Arc::clone(&db) as _));
        let guard = Arc::new(IdempotencyGuard::new(
            Arc::new(MemoryCache::new()),
            GuardConfig::default(),
        ));

        let (queue, receivers) = CallbackQueue::new(&[Chain::Heco], 4);
        let queued = queue
            .dispatch(
                Chain::Heco,
                "0xabc",
                vec![sample_payload("CraftBase"), sample_payload("LandResource")],
            )
            .await
            .unwrap();
        assert!(queued);

        // shutdown is already requested when the workers start
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let handles = spawn_workers(
            receivers,
            guard,
            router,
            Arc::clone(&db) as _,
            &WorkerConfig {
                workers_per_queue: 1,
                ..Default::default()
            },
            shutdown_rx,
        );
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(handler.calls(), 2);
        assert!(queue.in_flight().is_empty());
        let row = db.transaction(Chain::Heco, "0xabc").unwrap();
        assert_eq!(row.status, TxStatus::Success);
        assert_eq!(row.contract_name.as_deref(), Some("CraftBase"));
    }
}
