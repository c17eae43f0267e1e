//! Supervision for long-running loops.
//!
//! A supervised loop that panics or fails is logged and restarted after a fixed
//! delay. `AppError::Cancelled` and a clean return end supervision.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::domain::AppError;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Wait out `delay`, returning `false` if shutdown arrived first
async fn backoff(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => !is_shutting_down(shutdown),
        changed = shutdown.changed() => changed.is_ok() && !is_shutting_down(shutdown),
    }
}

/// Run `make_loop` until it finishes cleanly, is cancelled, or shutdown is signalled.
pub async fn supervise<F, Fut>(
    name: String,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    make_loop: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let mut restarts: u64 = 0;
    while !is_shutting_down(&shutdown) {
        let handle = tokio::spawn(make_loop());
        match handle.await {
            Ok(Ok(())) => {
                info!(task = %name, "Supervised loop finished");
                return;
            }
            Ok(Err(AppError::Cancelled)) => {
                info!(task = %name, "Supervised loop cancelled");
                return;
            }
            Ok(Err(e)) => {
                error!(task = %name, error = ?e, restarts, "Supervised loop failed");
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic().as_ref());
                error!(task = %name, panic = %message, restarts, "Supervised loop panicked");
            }
            Err(join_error) => {
                info!(task = %name, error = %join_error, "Supervised loop aborted");
                return;
            }
        }

        restarts += 1;
        if !backoff(restart_delay, &mut shutdown).await {
            break;
        }
        info!(task = %name, restarts, "Restarting supervised loop");
    }
    info!(task = %name, "Supervisor stopped");
}

/// Spawn [`supervise`] on its own task
#[must_use]
pub fn spawn_supervised<F, Fut>(
    name: impl Into<String>,
    restart_delay: Duration,
    shutdown: watch::Receiver<bool>,
    make_loop: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    tokio::spawn(supervise(name.into(), restart_delay, shutdown, make_loop))
}

/// Call `tick` every `period` until shutdown, which ends with `AppError::Cancelled`.
///
/// A tick error ends the loop so the supervisor can restart it.
pub async fn run_every<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> Result<(), AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || is_shutting_down(&shutdown) {
                    return Err(AppError::Cancelled);
                }
                continue;
            }
        }
        if is_shutting_down(&shutdown) {
            return Err(AppError::Cancelled);
        }
        tick().await?;
    }
}
