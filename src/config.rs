use anyhow::bail;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::evaluator::DEFAULT_TIMEOUT;
use crate::worker::WorkerSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Python interpreter used for workers. Supports ${ENV_VAR} substitution
    #[serde(default = "default_python")]
    pub python: String,
    /// Per-evaluation deadline
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Number of worker processes
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Spawn + handshake deadline for a worker
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: f64,
    /// Candidates larger than this are rejected without parsing
    #[serde(default)]
    pub max_code_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// JSONL file of tasks to evaluate
    pub tasks: PathBuf,
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
    /// Spawn the first worker before the first task
    #[serde(default = "default_warmup")]
    pub warmup: bool,
    /// Clean up raw model output before evaluating it
    #[serde(default)]
    pub prepare: bool,
    /// Only evaluate the first N tasks
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            timeout_secs: default_timeout_secs(),
            pool_size: default_pool_size(),
            startup_timeout_secs: default_startup_timeout_secs(),
            max_code_bytes: None,
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_timeout_secs() -> f64 {
    10.0
}

fn default_pool_size() -> usize {
    1
}

fn default_startup_timeout_secs() -> f64 {
    10.0
}

fn default_results_path() -> PathBuf {
    PathBuf::from("results.json")
}

fn default_warmup() -> bool {
    true
}

impl SandboxConfig {
    /// Per-evaluation deadline. Falls back to the default for values
    /// `validate` would reject.
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_secs).unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        let defaults = WorkerSettings::default();
        WorkerSettings {
            interpreter: self.python.clone(),
            startup_timeout: seconds(self.startup_timeout_secs)
                .unwrap_or(defaults.startup_timeout),
        }
    }

    /// Human-readable summary for startup logs
    pub fn description(&self) -> String {
        format!(
            "{} worker(s) of `{}`, {:.1}s timeout",
            self.pool_size, self.python, self.timeout_secs
        )
    }
}

/// Converts a configured number of seconds, rejecting zero, negative,
/// non-finite and out-of-range values.
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${PYTHON}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let sandbox = &self.sandbox;
        if sandbox.pool_size == 0 {
            bail!("sandbox.pool_size must be at least 1");
        }
        if seconds(sandbox.timeout_secs).is_none() {
            bail!("sandbox.timeout_secs must be a positive, representable number of seconds");
        }
        if seconds(sandbox.startup_timeout_secs).is_none() {
            bail!(
                "sandbox.startup_timeout_secs must be a positive, representable number of seconds"
            );
        }
        if sandbox.python.trim().is_empty() {
            bail!("sandbox.python must name an interpreter");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse("[run]\ntasks = \"data/tasks.jsonl\"\n").unwrap();
        assert_eq!(config.sandbox.python, "python3");
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(10));
        assert_eq!(config.sandbox.pool_size, 1);
        assert_eq!(config.sandbox.max_code_bytes, None);
        assert_eq!(config.run.tasks, PathBuf::from("data/tasks.jsonl"));
        assert_eq!(config.run.results, PathBuf::from("results.json"));
        assert!(config.run.warmup);
        assert!(!config.run.prepare);
        assert_eq!(config.run.limit, None);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
[sandbox]
python = "/usr/bin/python3.11"
timeout_secs = 2.5
pool_size = 4
startup_timeout_secs = 5.0
max_code_bytes = 65536

[run]
tasks = "tasks.jsonl"
results = "out/results.json"
warmup = false
prepare = true
limit = 20
"#,
        )
        .unwrap();
        assert_eq!(config.sandbox.timeout(), Duration::from_millis(2500));
        assert_eq!(config.sandbox.pool_size, 4);
        assert_eq!(config.sandbox.max_code_bytes, Some(65536));

        let settings = config.sandbox.worker_settings();
        assert_eq!(settings.interpreter, "/usr/bin/python3.11");
        assert_eq!(settings.startup_timeout, Duration::from_secs(5));

        assert!(!config.run.warmup);
        assert!(config.run.prepare);
        assert_eq!(config.run.limit, Some(20));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("FLUUX_EVAL_TEST_PYTHON", "/opt/py/bin/python3");
        let config = Config::parse(
            "[sandbox]\npython = \"${FLUUX_EVAL_TEST_PYTHON}\"\n[run]\ntasks = \"t.jsonl\"\n",
        )
        .unwrap();
        assert_eq!(config.sandbox.python, "/opt/py/bin/python3");
    }

    #[test]
    fn test_missing_run_section_rejected() {
        assert!(Config::parse("[sandbox]\npool_size = 1\n").is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let err = Config::parse("[sandbox]\npool_size = 0\n[run]\ntasks = \"t\"\n").unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        assert!(Config::parse("[sandbox]\ntimeout_secs = 0.0\n[run]\ntasks = \"t\"\n").is_err());
        assert!(Config::parse("[sandbox]\ntimeout_secs = -1.0\n[run]\ntasks = \"t\"\n").is_err());
    }

    #[test]
    fn test_unrepresentable_timeouts_rejected() {
        let err = Config::parse("[sandbox]\ntimeout_secs = 1e30\n[run]\ntasks = \"t\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));

        let err = Config::parse("[sandbox]\nstartup_timeout_secs = 1e30\n[run]\ntasks = \"t\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("startup_timeout_secs"));

        assert!(Config::parse("[sandbox]\ntimeout_secs = nan\n[run]\ntasks = \"t\"\n").is_err());
    }

    #[test]
    fn test_out_of_range_fields_do_not_panic() {
        let sandbox = SandboxConfig {
            timeout_secs: 1e30,
            startup_timeout_secs: f64::INFINITY,
            ..SandboxConfig::default()
        };
        assert_eq!(sandbox.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(
            sandbox.worker_settings().startup_timeout,
            WorkerSettings::default().startup_timeout
        );
    }

    #[test]
    fn test_description() {
        let sandbox = SandboxConfig::default();
        assert_eq!(sandbox.description(), "1 worker(s) of `python3`, 10.0s timeout");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.toml");
        std::fs::write(&path, "[run]\ntasks = \"x.jsonl\"\n").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.run.tasks, PathBuf::from("x.jsonl"));
    }
}
