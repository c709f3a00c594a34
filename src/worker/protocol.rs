//! Wire protocol between the host and a worker process.
//!
//! One JSON object per line on the worker's stdin (requests) and on a
//! private duplicate of its original stdout (responses). Every message
//! carries a `type` tag.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityTable;
use crate::outcome::FailureKind;

/// Host → worker.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request<'a> {
    /// First message after spawn: the capability table to enforce.
    Init { capabilities: &'a CapabilityTable },
    /// Run one submission.
    Execute {
        code: &'a str,
        tests: &'a str,
        entry_point: &'a str,
    },
    /// Exit the request loop.
    Shutdown,
}

/// Worker → host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Sent once, after `init` was applied.
    Ready { python: String },
    /// Result of one `execute`.
    Outcome {
        passed: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        kind: Option<FailureKind>,
    },
}

/// Encodes a request as a single line, newline included.
pub fn encode(request: &Request<'_>) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

pub fn decode(line: &str) -> serde_json::Result<Response> {
    serde_json::from_str(line.trim_end())
}
