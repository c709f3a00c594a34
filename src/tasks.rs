//! Evaluation tasks read from a JSONL file, one object per line.
//!
//! Accepted field names follow the common benchmark dumps:
//! `code` / `candidate` / `completion`, `tests` / `test`, `entry_point`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::outcome::CandidateSubmission;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalTask {
    pub task_id: String,
    #[serde(alias = "candidate", alias = "completion")]
    pub code: String,
    #[serde(alias = "test")]
    pub tests: String,
    pub entry_point: String,
}

impl EvalTask {
    pub fn submission(&self) -> CandidateSubmission {
        CandidateSubmission::new(&self.code, &self.tests, &self.entry_point)
    }
}

/// Parses tasks from JSONL text. Blank lines are skipped.
pub fn parse(content: &str, limit: Option<usize>) -> Result<Vec<EvalTask>> {
    let mut tasks = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if limit.is_some_and(|n| tasks.len() >= n) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let task: EvalTask = serde_json::from_str(line)
            .map_err(|e| anyhow!("line {}: {e}", index + 1))?;
        tasks.push(task);
    }
    Ok(tasks)
}

pub fn load(path: &Path, limit: Option<usize>) -> Result<Vec<EvalTask>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading tasks from {}", path.display()))?;
    parse(&content, limit).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS: &str = r#"{"task_id": "t/0", "code": "def f():\n    return 1\n", "tests": "assert f() == 1", "entry_point": "f"}

{"task_id": "t/1", "completion": "def g():\n    return 2\n", "test": "assert g() == 2", "entry_point": "g"}
{"task_id": "t/2", "candidate": "def h():\n    return 3\n", "tests": "assert h() == 3", "entry_point": "h"}
"#;

    #[test]
    fn test_parse_with_aliases() {
        let tasks = parse(TASKS, None).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].task_id, "t/0");
        assert_eq!(tasks[1].code, "def g():\n    return 2\n");
        assert_eq!(tasks[1].tests, "assert g() == 2");
        assert_eq!(tasks[2].entry_point, "h");
    }

    #[test]
    fn test_parse_limit() {
        let tasks = parse(TASKS, Some(2)).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].task_id, "t/1");
        assert!(parse(TASKS, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_line() {
        let content = "{\"task_id\": \"a\", \"code\": \"\", \"tests\": \"\", \"entry_point\": \"f\"}\n{oops}\n";
        let err = parse(content, None).unwrap_err();
        assert!(err.to_string().starts_with("line 2:"), "{err}");
    }

    #[test]
    fn test_missing_field_is_error() {
        assert!(parse("{\"task_id\": \"a\", \"code\": \"\"}\n", None).is_err());
    }

    #[test]
    fn test_submission() {
        let tasks = parse(TASKS, Some(1)).unwrap();
        let sub = tasks[0].submission();
        assert_eq!(sub.entry_point, "f");
        assert_eq!(sub.tests, "assert f() == 1");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, TASKS).unwrap();
        assert_eq!(load(&path, None).unwrap().len(), 3);
        assert!(load(&dir.path().join("missing.jsonl"), None).is_err());
    }
}
