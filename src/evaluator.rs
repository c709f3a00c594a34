//! Evaluation orchestrator — the public entry point.
//!
//! `evaluate` screens the candidate statically, and only if it is clean
//! hands it to an [`Executor`] (normally the [`WorkerPool`]) under a
//! deadline. Every failure mode comes back as an [`EvaluationOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::guard::{self, Diagnostic};
use crate::outcome::{CandidateSubmission, EvaluationOutcome};
use crate::pool::WorkerPool;

/// Deadline applied when the caller does not give one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can run a screened submission in isolation.
///
/// Implementations must turn every failure into an outcome; nothing
/// escapes as an error.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        submission: &CandidateSubmission,
        timeout: Duration,
    ) -> EvaluationOutcome;
}

pub struct Evaluator {
    executor: Arc<dyn Executor>,
    max_code_bytes: Option<usize>,
}

impl Evaluator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            max_code_bytes: None,
        }
    }

    /// Evaluator backed by a worker pool.
    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        Self::new(pool)
    }

    /// Rejects candidates larger than `limit` bytes before parsing them.
    pub fn with_max_code_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_code_bytes = limit;
        self
    }

    /// Evaluates `submission`, waiting at most `timeout` for the worker.
    pub async fn evaluate(
        &self,
        submission: &CandidateSubmission,
        timeout: Duration,
    ) -> EvaluationOutcome {
        if let Some(diagnostic) = self.screen(&submission.code) {
            debug!("Candidate rejected before execution: {diagnostic}");
            return EvaluationOutcome::fail(diagnostic.kind(), diagnostic.to_string());
        }

        self.executor.execute(submission, timeout).await
    }

    /// [`evaluate`](Self::evaluate) with the 10s default deadline.
    pub async fn evaluate_default(&self, submission: &CandidateSubmission) -> EvaluationOutcome {
        self.evaluate(submission, DEFAULT_TIMEOUT).await
    }

    /// Runs a trivial submission so the first real task does not pay for
    /// the worker start-up.
    pub async fn warm_up(&self) -> EvaluationOutcome {
        let warmup = CandidateSubmission::new(
            "def __warmup__():\n    return None\n",
            "def check(__warmup__):\n    pass\ncheck(__warmup__)\n",
            "__warmup__",
        );
        self.evaluate_default(&warmup).await
    }

    fn screen(&self, code: &str) -> Option<Diagnostic> {
        if let Some(limit) = self.max_code_bytes {
            if code.len() > limit {
                return Some(Diagnostic::TooLarge {
                    size: code.len(),
                    limit,
                });
            }
        }
        guard::screen(code)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::outcome::FailureKind;
    use crate::worker::{interpreter_available, WorkerSettings};

    /// Counts invocations and always passes.
    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn execute(&self, _: &CandidateSubmission, _: Duration) -> EvaluationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            EvaluationOutcome::pass()
        }
    }

    fn counting() -> (Arc<CountingExecutor>, Evaluator) {
        let executor = Arc::new(CountingExecutor::default());
        let evaluator = Evaluator::new(executor.clone());
        (executor, evaluator)
    }

    fn real() -> Option<(Arc<WorkerPool>, Evaluator)> {
        let settings = WorkerSettings::default();
        if !interpreter_available(&settings.interpreter) {
            eprintln!("python3 not available, skipping");
            return None;
        }
        let pool = WorkerPool::single(settings);
        Some((pool.clone(), Evaluator::with_pool(pool)))
    }

    /// Compile-time verification that `Executor` is object-safe.
    #[test]
    fn test_executor_is_object_safe() {
        fn _assert_object_safe(_: &dyn Executor) {}
    }

    #[tokio::test]
    async fn test_global_never_reaches_executor() {
        let (executor, evaluator) = counting();
        let sub = CandidateSubmission::new(
            "x = 0\ndef f():\n    global x\n    return x\n",
            "assert f() == 0",
            "f",
        );
        let outcome = evaluator.evaluate_default(&sub).await;
        assert!(!outcome.passed);
        assert_eq!(outcome.error.as_deref(), Some("forbidden construct: Global"));
        assert_eq!(outcome.kind, Some(FailureKind::ForbiddenConstruct));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocked_imports_never_reach_executor() {
        let (executor, evaluator) = counting();
        for code in [
            "import os\ndef f():\n    return 1\n",
            "from subprocess import run\ndef f():\n    return 1\n",
            "def f():\n    import ctypes\n    return 1\n",
        ] {
            let outcome = evaluator
                .evaluate_default(&CandidateSubmission::new(code, "f()", "f"))
                .await;
            assert_eq!(outcome.kind, Some(FailureKind::ForbiddenImport), "{code}");
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        let outcome = evaluator
            .evaluate_default(&CandidateSubmission::new("import os\n", "", "f"))
            .await;
        assert_eq!(outcome.error.as_deref(), Some("forbidden import: os"));
    }

    #[tokio::test]
    async fn test_syntax_error_never_reaches_executor() {
        let (executor, evaluator) = counting();
        let outcome = evaluator
            .evaluate_default(&CandidateSubmission::new("def f(:\n", "f()", "f"))
            .await;
        assert_eq!(outcome.kind, Some(FailureKind::SyntaxError));
        assert!(outcome.error.unwrap().starts_with("SyntaxError: "));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let executor = Arc::new(CountingExecutor::default());
        let evaluator = Evaluator::new(executor.clone()).with_max_code_bytes(Some(16));
        let outcome = evaluator
            .evaluate_default(&CandidateSubmission::new(
                "def f():\n    return 12345\n",
                "",
                "f",
            ))
            .await;
        assert_eq!(outcome.kind, Some(FailureKind::TooLarge));
        assert_eq!(
            outcome.error.as_deref(),
            Some("candidate too large: 26 bytes (limit 16)")
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clean_candidate_is_delegated() {
        let (executor, evaluator) = counting();
        let sub = CandidateSubmission::new("def f():\n    return 1\n", "assert f() == 1", "f");
        assert_eq!(evaluator.evaluate_default(&sub).await, EvaluationOutcome::pass());
        assert_eq!(evaluator.warm_up().await, EvaluationOutcome::pass());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_add_scenario() {
        let Some((pool, evaluator)) = real() else { return };

        let buggy = CandidateSubmission::new(
            "def add(a,b):\n    return a-b\n",
            "assert add(2,3)==5",
            "add",
        );
        let outcome = evaluator.evaluate_default(&buggy).await;
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().starts_with("AssertionError"));

        let fixed = CandidateSubmission::new(
            "def add(a,b):\n    return a+b\n",
            "assert add(2,3)==5",
            "add",
        );
        assert_eq!(evaluator.evaluate_default(&fixed).await.into_pair(), (true, None));
        assert_eq!(evaluator.evaluate_default(&fixed).await.into_pair(), (true, None));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let Some((_pool, evaluator)) = real() else { return };
        let outcome = evaluator
            .evaluate_default(&CandidateSubmission::new(
                "def sub(a, b):\n    return a - b\n",
                "assert add(1, 1) == 2",
                "add",
            ))
            .await;
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().ends_with("not found or not callable"));
    }

    #[tokio::test]
    async fn test_infinite_loop_then_recovery() {
        let Some((_pool, evaluator)) = real() else { return };
        let looping = CandidateSubmission::new(
            "def f(n):\n    while n >= 0:\n        n += 1\n    return n\n",
            "assert f(1) == 0",
            "f",
        );
        let started = std::time::Instant::now();
        let outcome = evaluator.evaluate(&looping, Duration::from_secs(2)).await;
        assert_eq!(outcome.error.as_deref(), Some("timeout after 2.0s"));
        assert!(started.elapsed() < Duration::from_secs(6));

        assert!(evaluator.warm_up().await.passed);
    }
}
