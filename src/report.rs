//! Pass-rate bookkeeping for a batch run.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::outcome::{EvaluationOutcome, FailureKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub passed: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
pub struct Report {
    results: Vec<TaskResult>,
}

/// Serialized form written to the results file.
#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    generated_at: String,
    evaluated: usize,
    passed: usize,
    pass_at_1: f64,
    failures: BTreeMap<FailureKind, usize>,
    results: &'a [TaskResult],
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task_id: &str, outcome: EvaluationOutcome, elapsed_ms: u64) {
        self.results.push(TaskResult {
            task_id: task_id.to_string(),
            passed: outcome.passed,
            error: outcome.error,
            kind: outcome.kind,
            elapsed_ms,
        });
    }

    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn evaluated(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Fraction of tasks passing on the first attempt; 0.0 when empty.
    pub fn pass_at_1(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.passed() as f64 / self.evaluated() as f64
        }
    }

    /// Number of failed tasks per failure kind.
    pub fn failures(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.results.iter().filter_map(|r| r.kind) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    /// Multi-line summary printed at the end of a run.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Evaluated: {}\nPassed   : {}\npass@1   : {:.3}",
            self.evaluated(),
            self.passed(),
            self.pass_at_1()
        );
        for (kind, count) in self.failures() {
            out.push_str(&format!("\n  {kind}: {count}"));
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        let file = ReportFile {
            generated_at: chrono::Utc::now().to_rfc3339(),
            evaluated: self.evaluated(),
            passed: self.passed(),
            pass_at_1: self.pass_at_1(),
            failures: self.failures(),
            results: &self.results,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("writing {}", path.display()))
    }
}
