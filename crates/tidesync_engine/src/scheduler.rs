//! Periodic driver for [`SyncManager::run_sync`].

use crate::manager::SyncManager;
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs sync cycles on a timer and on demand.
///
/// The scheduler is the only caller of `run_sync` for its manager. Cycles run
/// on the blocking pool one at a time; a tick that falls due while a cycle is
/// in flight is skipped, and triggers received meanwhile collapse into a
/// single follow-up cycle.
pub struct SyncScheduler {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    in_flight: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Starts the scheduler on the current tokio runtime.
    ///
    /// With `interval = None` cycles only run on [`trigger`](Self::trigger).
    /// Otherwise the first cycle starts immediately.
    pub fn start<T>(manager: Arc<SyncManager<T>>, interval: Option<Duration>) -> Self
    where
        T: SyncTransport + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(AtomicBool::new(false));
        let cycles = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run_loop(
            manager,
            interval,
            Arc::clone(&trigger),
            shutdown_rx,
            Arc::clone(&in_flight),
            Arc::clone(&cycles),
        ));

        Self {
            trigger,
            shutdown,
            in_flight,
            cycles,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Starts the scheduler with the manager's configured interval.
    pub fn from_config<T>(manager: Arc<SyncManager<T>>) -> Self
    where
        T: SyncTransport + 'static,
    {
        let interval = manager.config().sync_interval;
        Self::start(manager, interval)
    }

    /// Requests a cycle as soon as the current one, if any, finishes.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Returns true while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of cycles finished so far, failed ones included.
    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Stops scheduling and waits for the cycle in flight to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "sync scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("in_flight", &self.is_running())
            .field("cycles", &self.cycles_run())
            .finish()
    }
}

async fn run_loop<T>(
    manager: Arc<SyncManager<T>>,
    interval: Option<Duration>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    in_flight: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
) where
    T: SyncTransport + 'static,
{
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    tracing::info!(node = %manager.config().node_id, ?interval, "sync scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = trigger.notified() => {}
            _ = tick(&mut ticker) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        in_flight.store(true, Ordering::SeqCst);
        let worker = Arc::clone(&manager);
        let outcome = tokio::task::spawn_blocking(move || worker.run_sync()).await;
        in_flight.store(false, Ordering::SeqCst);
        cycles.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(report)) if !report.is_clean() => {
                tracing::warn!(failures = report.failures.len(), "sync cycle had failures");
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "sync cycle aborted"),
            Err(err) => tracing::error!(error = %err, "sync cycle panicked"),
        }
    }

    tracing::info!(node = %manager.config().node_id, "sync scheduler stopped");
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
