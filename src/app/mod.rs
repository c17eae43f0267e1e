//! Application layer: gating, dispatch, and the periodic loops.

pub mod confirmation;
pub mod cursor;
pub mod guard;
pub mod reconciler;
pub mod resolver;
pub mod router;
pub mod service;
pub mod state;
pub mod supervisor;
pub mod swap;
pub mod worker;

pub use confirmation::{Confirmation, ConfirmationGate, DEFAULT_CONFIRMATION_THRESHOLD};
pub use cursor::ScanCursorStore;
pub use guard::{GuardConfig, Guarded, IdempotencyGuard, ResultCache};
pub use reconciler::{ReconcileStats, ReconcilerConfig, StatusReconciler};
pub use resolver::{ReceiptResolver, RejectReason, Resolution, ResolvedReceipt, RetryPolicy};
pub use router::{CallbackRouter, HandlerNaming, HandlerRegistry, RouteOutcome};
pub use service::{Settlement, TransactionPipeline};
pub use state::{AppState, PipelineSettings};
pub use supervisor::{run_every, spawn_supervised, supervise};
pub use swap::{SwapConfig, SwapCorrelator, SwapPair, SwapStats};
pub use worker::{
    CallbackQueue, Completed, Delivery, InFlight, QueueReceivers, WorkerConfig, deliver,
    spawn_workers,
};
