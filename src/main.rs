use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fluux_eval::config::Config;
use fluux_eval::report::Report;
use fluux_eval::{prepare, tasks, CandidateSubmission, Evaluator, WorkerPool};

fn print_help() {
    println!(
        "\
fluux-eval v{}

Evaluates machine-generated Python candidates against their tests
in sandboxed worker processes and reports pass@1.

USAGE:
    fluux-eval [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/eval.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, fluux_eval=debug,warn)

EXAMPLES:
    fluux-eval                           # uses config/eval.toml
    fluux-eval runs/humaneval.toml       # custom config path
    RUST_LOG=debug fluux-eval            # with worker output",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("fluux-eval v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for worker output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fluux_eval=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/eval.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;
    info!("Sandbox: {}", config.sandbox.description());

    let batch = tasks::load(&config.run.tasks, config.run.limit)?;
    info!(
        "Loaded {} task(s) from {}",
        batch.len(),
        config.run.tasks.display()
    );

    let pool = Arc::new(WorkerPool::new(
        config.sandbox.pool_size,
        config.sandbox.worker_settings(),
    ));
    let evaluator = Evaluator::with_pool(pool.clone())
        .with_max_code_bytes(config.sandbox.max_code_bytes);
    let timeout = config.sandbox.timeout();

    // Warm up once so the first task does not pay for interpreter start-up
    if config.run.warmup {
        let outcome = evaluator.warm_up().await;
        if outcome.passed {
            info!("Sandbox warmed up");
        } else {
            warn!(
                "Warm-up failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let mut report = Report::new();
    let total = batch.len();

    for (index, task) in batch.iter().enumerate() {
        let submission = if config.run.prepare {
            CandidateSubmission::new(prepare::prepare(&task.code), &task.tests, &task.entry_point)
        } else {
            task.submission()
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            outcome = evaluator.evaluate(&submission, timeout) => outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping after {index} task(s)");
                break;
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome.error {
            None => info!(task_id = %task.task_id, "[{}/{total}] passed", index + 1),
            Some(error) => info!(
                task_id = %task.task_id,
                "[{}/{total}] failed: {error}",
                index + 1
            ),
        }
        report.record(&task.task_id, outcome, elapsed_ms);
    }

    println!("\n--- SUMMARY ---\n{}", report.summary());
    report.write(&config.run.results)?;
    info!("Saved detailed results to {}", config.run.results.display());

    let status = pool.status().await;
    info!(
        "Pool: {} spawned, {} replaced",
        status.spawned, status.replaced
    );
    pool.shutdown().await;

    Ok(())
}
