//! Isolated worker — one long-lived Python process that executes
//! submissions on request.
//!
//! The process is started with `-I -S -u` (isolated mode, no site
//! packages, unbuffered) and an empty environment apart from `PATH`.
//! Inside it, candidate code runs under the restricted capability set and
//! the trusted tests under the full one (see `bootstrap.py`).
//!
//! The worker has no notion of deadlines. The pool wraps every call in a
//! timeout and kills the process when it expires.

pub mod protocol;

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::capability::CapabilityTable;
use crate::outcome::{CandidateSubmission, EvaluationOutcome, FailureKind};
use protocol::{Request, Response};

/// Python source run by every worker process.
const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// How long a graceful shutdown may take before the process is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Failures of the isolation mechanism itself (never of the evaluated code).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker `{interpreter}`: {source}")]
    Spawn {
        interpreter: String,
        source: std::io::Error,
    },

    #[error("worker did not become ready within {0:.1}s")]
    StartupTimeout(f64),

    #[error("worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("worker i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed worker message: {0}")]
    Protocol(String),
}

/// How worker processes are started.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Python interpreter to launch.
    pub interpreter: String,
    /// Upper bound on spawn + handshake.
    pub startup_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

/// A live worker process and its request/response channel.
pub struct Worker {
    id: u32,
    pid: Option<u32>,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    executions: u64,
}

impl Worker {
    /// Spawns a worker and completes the `init` → `ready` handshake.
    pub async fn spawn(
        id: u32,
        settings: &WorkerSettings,
        capabilities: &CapabilityTable,
    ) -> Result<Self, WorkerError> {
        // Preserve PATH so the interpreter can be found
        let path_env = std::env::var("PATH")
            .unwrap_or_else(|_| "/usr/bin:/usr/local/bin:/bin".to_string());

        let mut child = Command::new(&settings.interpreter)
            .args(["-I", "-S", "-u", "-c", BOOTSTRAP])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", &path_env)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                interpreter: settings.interpreter.clone(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(WorkerError::ChannelClosed)?;
        let stdout = child.stdout.take().ok_or(WorkerError::ChannelClosed)?;

        // Anything printed by candidate or test code ends up here
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = id, "{line}");
                }
            });
        }

        let mut worker = Self {
            id,
            pid,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            executions: 0,
        };

        let handshake = async {
            worker.send(&Request::Init { capabilities }).await?;
            worker.receive().await
        };
        let python = match tokio::time::timeout(settings.startup_timeout, handshake).await {
            Ok(Ok(Response::Ready { python })) => python,
            Ok(Ok(other)) => {
                return Err(WorkerError::Protocol(format!(
                    "expected ready, got {other:?}"
                )))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(WorkerError::StartupTimeout(
                    settings.startup_timeout.as_secs_f64(),
                ))
            }
        };

        info!(worker = id, pid = ?pid, "Worker ready (Python {python})");
        Ok(worker)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Number of submissions this worker has completed.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Runs one submission and waits for its outcome.
    ///
    /// Errors mean the worker is unusable and must be discarded. Failures of
    /// the submitted code are reported as an `Ok` outcome.
    pub async fn execute(
        &mut self,
        submission: &CandidateSubmission,
    ) -> Result<EvaluationOutcome, WorkerError> {
        self.send(&Request::Execute {
            code: &submission.code,
            tests: &submission.tests,
            entry_point: &submission.entry_point,
        })
        .await?;

        match self.receive().await? {
            Response::Outcome {
                passed,
                error,
                kind,
            } => {
                self.executions += 1;
                Ok(normalize(passed, error, kind))
            }
            other => Err(WorkerError::Protocol(format!(
                "expected outcome, got {other:?}"
            ))),
        }
    }

    /// Asks the worker to exit, killing it if it does not within a grace period.
    pub async fn shutdown(mut self) {
        if self.send(&Request::Shutdown).await.is_ok()
            && tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait())
                .await
                .is_ok()
        {
            debug!(worker = self.id, "Worker exited");
            return;
        }
        self.kill().await;
    }

    /// Kills the process and reaps it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(worker = self.id, "Failed to kill worker: {e}");
        } else {
            debug!(worker = self.id, pid = ?self.pid, "Worker killed");
        }
    }

    async fn send(&mut self, request: &Request<'_>) -> Result<(), WorkerError> {
        let line = protocol::encode(request).map_err(|e| WorkerError::Protocol(e.to_string()))?;
        self.stdin.write_all(line.as_bytes()).await.map_err(closed_or_io)?;
        self.stdin.flush().await.map_err(closed_or_io)?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Response, WorkerError> {
        match self.stdout.next_line().await? {
            Some(line) => {
                protocol::decode(&line).map_err(|e| WorkerError::Protocol(format!("{e}: {line}")))
            }
            None => Err(WorkerError::ChannelClosed),
        }
    }
}

fn closed_or_io(e: std::io::Error) -> WorkerError {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        WorkerError::ChannelClosed
    } else {
        WorkerError::Io(e)
    }
}

/// Enforces the outcome invariant: `error` and `kind` exist iff not passed.
fn normalize(passed: bool, error: Option<String>, kind: Option<FailureKind>) -> EvaluationOutcome {
    if passed {
        EvaluationOutcome::pass()
    } else {
        EvaluationOutcome::fail(
            kind.unwrap_or(FailureKind::RuntimeFailure),
            error.unwrap_or_else(|| "unknown failure".to_string()),
        )
    }
}

/// True when `interpreter` can be launched. Used by tests that need Python.
#[cfg(test)]
pub(crate) fn interpreter_available(interpreter: &str) -> bool {
    std::process::Command::new(interpreter)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
