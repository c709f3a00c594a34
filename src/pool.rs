//! Worker pool — owns the worker processes and hides their failures.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized ──first submit──▶ Active ──shutdown()──▶ Shutdown
//!                                  │  ▲
//!                   worker broken  │  │ replacement spawned on next use
//!                                  ▼  │
//!                                discarded
//! ```
//!
//! A fair semaphore with `size` permits bounds how many submissions run at
//! once and serves waiters in arrival order. Every state transition (spawn,
//! check-in, discard, shutdown) happens under one mutex.
//!
//! The deadline of a submission starts once it holds a permit and covers
//! spawning a worker as well as executing on it, for the retry too.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::capability::CapabilityTable;
use crate::evaluator::Executor;
use crate::outcome::{CandidateSubmission, EvaluationOutcome};
use crate::worker::{Worker, WorkerError, WorkerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// No worker has been spawned yet.
    Uninitialized,
    /// At least one worker was spawned; broken ones are replaced lazily.
    Active,
    /// Terminated; submissions are refused.
    Shutdown,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Uninitialized => f.write_str("uninitialized"),
            Lifecycle::Active => f.write_str("active"),
            Lifecycle::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub lifecycle: Lifecycle,
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    /// Workers spawned since creation, replacements included.
    pub spawned: u64,
    /// Workers discarded after a crash, protocol error or timeout.
    pub replaced: u64,
}

struct PoolState {
    lifecycle: Lifecycle,
    idle: Vec<Worker>,
    next_id: u32,
    spawned: u64,
    replaced: u64,
}

/// Why one attempt did not produce an outcome.
enum AttemptError {
    TimedOut,
    Broken(WorkerError),
    Closed,
}

/// Bounded pool of isolated workers.
pub struct WorkerPool {
    size: usize,
    settings: WorkerSettings,
    capabilities: &'static CapabilityTable,
    permits: Semaphore,
    state: Mutex<PoolState>,
    busy: AtomicUsize,
}

/// Counts a checked-out worker as busy until dropped, including when the
/// submitting future is cancelled.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Creates an empty pool. No process is started until the first submit.
    pub fn new(size: usize, settings: WorkerSettings) -> Self {
        let size = size.max(1);
        Self {
            size,
            settings,
            capabilities: CapabilityTable::global(),
            permits: Semaphore::new(size),
            state: Mutex::new(PoolState {
                lifecycle: Lifecycle::Uninitialized,
                idle: Vec::with_capacity(size),
                next_id: 1,
                spawned: 0,
                replaced: 0,
            }),
            busy: AtomicUsize::new(0),
        }
    }

    /// Single-worker pool, the default configuration.
    pub fn single(settings: WorkerSettings) -> Arc<Self> {
        Arc::new(Self::new(1, settings))
    }

    /// Runs `submission` on a worker, waiting at most `timeout` for it once
    /// its turn comes.
    ///
    /// A worker that times out is killed. A worker that breaks for any other
    /// reason is replaced and the submission retried exactly once, within
    /// what is left of the same deadline.
    pub async fn submit(
        &self,
        submission: &CandidateSubmission,
        timeout: Duration,
    ) -> EvaluationOutcome {
        // Held across the retry so a replacement attempt keeps its place in line
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return EvaluationOutcome::executor_error("worker pool is shut down"),
        };
        // None when the deadline is too far away to represent
        let deadline = Instant::now().checked_add(timeout);

        match self.attempt(submission, deadline).await {
            Ok(outcome) => outcome,
            Err(AttemptError::TimedOut) => EvaluationOutcome::timeout(timeout),
            Err(AttemptError::Closed) => {
                EvaluationOutcome::executor_error("worker pool is shut down")
            }
            Err(AttemptError::Broken(first)) => {
                warn!("Worker failed ({first}), retrying on a fresh worker");
                match self.attempt(submission, deadline).await {
                    Ok(outcome) => outcome,
                    Err(AttemptError::TimedOut) => EvaluationOutcome::timeout(timeout),
                    Err(AttemptError::Closed) => {
                        EvaluationOutcome::executor_error("worker pool is shut down")
                    }
                    Err(AttemptError::Broken(second)) => {
                        warn!("Retry failed: {second}");
                        EvaluationOutcome::executor_error(second)
                    }
                }
            }
        }
    }

    /// Terminates every idle worker and refuses further submissions.
    ///
    /// Submissions in flight finish their current attempt; their workers are
    /// killed at check-in.
    pub async fn shutdown(&self) {
        let workers = {
            let mut state = self.state.lock().await;
            if state.lifecycle == Lifecycle::Shutdown {
                return;
            }
            state.lifecycle = Lifecycle::Shutdown;
            std::mem::take(&mut state.idle)
        };
        self.permits.close();

        let count = workers.len();
        for worker in workers {
            worker.shutdown().await;
        }
        info!("Worker pool shut down ({count} worker(s) terminated)");
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        PoolStatus {
            lifecycle: state.lifecycle,
            size: self.size,
            idle: state.idle.len(),
            busy: self.busy.load(Ordering::SeqCst),
            spawned: state.spawned,
            replaced: state.replaced,
        }
    }

    async fn attempt(
        &self,
        submission: &CandidateSubmission,
        deadline: Option<Instant>,
    ) -> Result<EvaluationOutcome, AttemptError> {
        // A worker still starting up is dropped here, and kill_on_drop ends it
        let Some(checked_out) = within(deadline, self.checkout()).await else {
            warn!("Deadline expired while starting a worker");
            return Err(AttemptError::TimedOut);
        };
        let mut worker = checked_out?;
        let _busy = BusyGuard::new(&self.busy);

        match within(deadline, worker.execute(submission)).await {
            Some(Ok(outcome)) => {
                self.checkin(worker).await;
                Ok(outcome)
            }
            Some(Err(e)) => {
                self.discard(worker, &e.to_string()).await;
                Err(AttemptError::Broken(e))
            }
            None => {
                self.discard(worker, "deadline expired").await;
                Err(AttemptError::TimedOut)
            }
        }
    }

    /// Takes an idle worker, spawning one if none is available.
    async fn checkout(&self) -> Result<Worker, AttemptError> {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Shutdown {
            return Err(AttemptError::Closed);
        }

        if let Some(worker) = state.idle.pop() {
            return Ok(worker);
        }

        let id = state.next_id;
        state.next_id += 1;
        let worker = Worker::spawn(id, &self.settings, self.capabilities)
            .await
            .map_err(AttemptError::Broken)?;

        state.lifecycle = Lifecycle::Active;
        state.spawned += 1;
        info!(worker = id, "Spawned worker ({} total)", state.spawned);
        Ok(worker)
    }

    async fn checkin(&self, worker: Worker) {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Shutdown {
            drop(state);
            worker.shutdown().await;
        } else {
            state.idle.push(worker);
        }
    }

    async fn discard(&self, mut worker: Worker, reason: &str) {
        warn!(
            worker = worker.id(),
            pid = ?worker.pid(),
            "Discarding worker after {} execution(s): {reason}",
            worker.executions()
        );
        worker.kill().await;

        self.state.lock().await.replaced += 1;
    }
}

/// Awaits `fut` until `deadline`, or without bound when there is none.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[async_trait]
impl Executor for WorkerPool {
    async fn execute(
        &self,
        submission: &CandidateSubmission,
        timeout: Duration,
    ) -> EvaluationOutcome {
        self.submit(submission, timeout).await
    }
}
