use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One unit of work: untrusted candidate code plus the trusted tests
/// that exercise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSubmission {
    /// Source of one function, possibly preceded by imports.
    pub code: String,
    /// Test script that defines and invokes a check against the candidate.
    pub tests: String,
    /// Name of the function the tests call.
    pub entry_point: String,
}

impl CandidateSubmission {
    pub fn new(
        code: impl Into<String>,
        tests: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            tests: tests.into(),
            entry_point: entry_point.into(),
        }
    }
}

/// Why an evaluation did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SyntaxError,
    ForbiddenConstruct,
    ForbiddenImport,
    TooLarge,
    EntryPointMissing,
    RuntimeFailure,
    Timeout,
    ExecutorError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::SyntaxError => "syntax_error",
            FailureKind::ForbiddenConstruct => "forbidden_construct",
            FailureKind::ForbiddenImport => "forbidden_import",
            FailureKind::TooLarge => "too_large",
            FailureKind::EntryPointMissing => "entry_point_missing",
            FailureKind::RuntimeFailure => "runtime_failure",
            FailureKind::Timeout => "timeout",
            FailureKind::ExecutorError => "executor_error",
        };
        f.write_str(s)
    }
}

/// Normalized result of one evaluation.
///
/// `error` and `kind` are present exactly when `passed` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub passed: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl EvaluationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            error: None,
            kind: None,
        }
    }

    pub fn fail(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::fail(
            FailureKind::Timeout,
            format!("timeout after {:.1}s", after.as_secs_f64()),
        )
    }

    pub fn executor_error(detail: impl fmt::Display) -> Self {
        Self::fail(FailureKind::ExecutorError, format!("executor error: {detail}"))
    }

    /// `(passed, error)` pair, the shape upstream callers consume.
    pub fn into_pair(self) -> (bool, Option<String>) {
        (self.passed, self.error)
    }
}
