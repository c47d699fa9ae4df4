//! Background sweeper for both tiers.
//!
//! One task drains the fast-tier deadline queue on a short cadence and sweeps
//! expired durable rows on a long one. It only holds a weak reference to the
//! manager, so dropping the last manager clone stops it on the next tick.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::manager::WeakCacheManager;

/// Owns the sweeper task. Dropping the handle aborts the task.
pub struct MaintenanceHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Ask the task to stop and wait for it.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join().await;
    }

    /// Wait for the task to stop on its own.
    pub async fn stopped(mut self) {
        self.join().await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// `cleanup_every` is `None` when there is no durable tier to sweep.
pub(crate) fn spawn(
    manager: WeakCacheManager,
    sweep_every: Duration,
    cleanup_every: Option<Duration>,
) -> MaintenanceHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(manager, sweep_every, cleanup_every, shutdown_rx));
    info!(
        sweep_ms = sweep_every.as_millis() as u64,
        cleanup_secs = cleanup_every.map(|every| every.as_secs()),
        "Cache maintenance started"
    );

    MaintenanceHandle {
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn run(
    manager: WeakCacheManager,
    sweep_every: Duration,
    cleanup_every: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let start = Instant::now();
    let mut sweep = interval_at(start + sweep_every, sweep_every);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Without a durable tier the cleanup timer parks on a far deadline.
    let cleanup_period = cleanup_every.unwrap_or(Duration::from_secs(u32::MAX.into()));
    let mut cleanup = interval_at(start + cleanup_period, cleanup_period);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Cache maintenance shutting down");
                break;
            }
            _ = sweep.tick() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.purge_fast();
            }
            _ = cleanup.tick(), if cleanup_every.is_some() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.cleanup_durable().await;
            }
        }
    }

    debug!("Cache maintenance stopped");
}
