//! Background loops: the pool-surfacing worker and the retention cleanup
//! job. One worker instance per process; multiple processes stay safe
//! because link creation is idempotent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::DbPool;
use crate::engine::surfacing::{run_surfacing_pass, SurfacingPassResult};

/// Default interval between surfacing passes.
pub const DEFAULT_SURFACING_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How far the first pass looks back.
const INITIAL_LOOKBACK_HOURS: i64 = 24;

/// Runtime state for the background workers, shared across tasks.
pub struct WorkerState {
    running: AtomicBool,
    passes_completed: AtomicU64,
    links_created: AtomicU64,
    pass_errors: AtomicU64,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerState {
    pub fn new() -> Self {
        WorkerState {
            running: AtomicBool::new(false),
            passes_completed: AtomicU64::new(0),
            links_created: AtomicU64::new(0),
            pass_errors: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            running: self.running.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            links_created: self.links_created.load(Ordering::Relaxed),
            pass_errors: self.pass_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub running: bool,
    pub passes_completed: u64,
    pub links_created: u64,
    pub pass_errors: u64,
}

/// Periodic pool-surfacing worker.
///
/// The `since` watermark is the start time of the last completed pass, so
/// jobs inserted mid-pass are seen by the next one; idempotent link
/// creation makes the overlap safe.
pub struct PoolSurfacingWorker {
    pool: DbPool,
    interval: Duration,
    state: Arc<WorkerState>,
    last_pass_started_at: Mutex<Option<String>>,
}

impl PoolSurfacingWorker {
    pub fn new(pool: DbPool, interval: Duration, state: Arc<WorkerState>) -> Self {
        PoolSurfacingWorker {
            pool,
            interval,
            state,
            last_pass_started_at: Mutex::new(None),
        }
    }

    fn since(&self) -> String {
        self.last_pass_started_at
            .lock()
            .expect("watermark mutex poisoned")
            .clone()
            .unwrap_or_else(|| {
                (chrono::Utc::now() - chrono::Duration::hours(INITIAL_LOOKBACK_HOURS)).to_rfc3339()
            })
    }

    /// One pass; advances the watermark only after completion.
    pub fn run_once(&self) -> Result<SurfacingPassResult, crate::error::AppError> {
        let since = self.since();
        let mut conn = self.pool.get()?;
        let result = run_surfacing_pass(&mut conn, &since)?;
        *self
            .last_pass_started_at
            .lock()
            .expect("watermark mutex poisoned") = Some(result.started_at.clone());
        Ok(result)
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }
            match self.run_once() {
                Ok(result) => {
                    self.state.passes_completed.fetch_add(1, Ordering::Relaxed);
                    self.state
                        .links_created
                        .fetch_add(result.links_created as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.state.pass_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Surfacing pass failed");
                }
            }
        }
        tracing::info!("Surfacing worker loop exited");
    }
}

/// Handles to the running background loops.
pub struct BackgroundHandles {
    pub cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl BackgroundHandles {
    /// Graceful stop: cancel, then await each task with cancellation
    /// swallowed.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!("Background loops stopped");
    }
}

/// Start the surfacing worker and the daily cleanup loop. Returns
/// immediately with handles for graceful shutdown.
pub fn start_loops(
    state: Arc<WorkerState>,
    pool: DbPool,
    surfacing_interval: Duration,
) -> BackgroundHandles {
    state.running.store(true, Ordering::Relaxed);
    tracing::info!(
        interval_secs = surfacing_interval.as_secs(),
        "Background loops starting: surfacing worker + daily cleanup"
    );

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let worker = Arc::new(PoolSurfacingWorker::new(
        pool.clone(),
        surfacing_interval,
        state.clone(),
    ));
    tasks.push(tokio::spawn(worker.run_loop(cancel.clone())));

    tasks.push(tokio::spawn(cleanup_loop(pool, cancel.clone())));

    BackgroundHandles { cancel, tasks }
}

/// Retention cleanup, daily.
async fn cleanup_loop(pool: DbPool, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(24 * 3600));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => break,
        }
        match pool.get() {
            Ok(conn) => match crate::engine::cleanup::run_all(&conn) {
                Ok(stats) => {
                    if stats.total() > 0 {
                        tracing::info!(?stats, "Retention cleanup removed rows");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Retention cleanup failed"),
            },
            Err(e) => tracing::error!(error = %e, "Cleanup loop could not get connection"),
        }
    }
    tracing::info!("Cleanup loop exited");
}
