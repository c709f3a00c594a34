//! Sandboxed evaluation of untrusted, machine-generated Python candidates.
//!
//! ```text
//! Evaluator ──▶ guard (static rejection)
//!     │
//!     └──▶ WorkerPool ──▶ Worker (python3 process, capability table)
//! ```
//!
//! The security model is layered:
//!
//! 1. Static guard — `global`/`nonlocal` and blocked imports never run
//! 2. Capability table — candidates see an allow-listed set of builtins and
//!    a guarded `__import__`; only the trusted tests get the full set
//! 3. Process isolation — each worker is a separate interpreter, killed on
//!    timeout and replaced on crash
//!
//! This is a language-runtime barrier, not an OS sandbox: no seccomp,
//! namespaces or containers are involved.

pub mod capability;
pub mod config;
pub mod evaluator;
pub mod guard;
pub mod outcome;
pub mod pool;
pub mod prepare;
pub mod report;
pub mod tasks;
pub mod worker;

pub use evaluator::{Evaluator, Executor, DEFAULT_TIMEOUT};
pub use outcome::{CandidateSubmission, EvaluationOutcome, FailureKind};
pub use pool::{PoolStatus, WorkerPool};
