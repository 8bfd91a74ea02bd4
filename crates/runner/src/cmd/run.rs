use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use remote::{Deadline, Dispatcher};
use tracing::info;

use crate::config;
use crate::error::{RunnerError, RunnerResult};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the runner YAML config
    #[arg(long, short, env = "REMOTE_RUNNER_CONFIG")]
    config: PathBuf,
    /// Program file fed to the configured interpreter. It must write its
    /// JSON result through the result channel.
    #[arg(long, short)]
    program: PathBuf,
    /// Overrides the config's timeout_ms
    #[arg(long)]
    timeout_ms: Option<u64>,
}

/// Run a program in the configured backend and print its JSON result.
pub async fn run_program(args: RunArgs) -> RunnerResult<()> {
    let runner_config = config::load(&args.config).await?;
    let program = tokio::fs::read_to_string(&args.program)
        .await
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", args.program.display())))?;
    let deadline = match args.timeout_ms {
        Some(0) => return Err(RunnerError::Config("--timeout-ms must be positive".into())),
        Some(ms) => Deadline::from_millis(ms),
        None => runner_config.deadline(),
    };

    let dispatcher = Dispatcher::with_defaults()?;
    let started = Instant::now();
    let value = dispatcher
        .run_program(&runner_config.backend, &program, deadline)
        .await?;
    info!(
        backend = %runner_config.backend.kind(),
        elapsed_ms = started.elapsed().as_millis(),
        "program finished"
    );

    let rendered = serde_json::to_string_pretty(&value)
        .map_err(|e| RunnerError::Config(format!("render result: {e}")))?;
    println!("{rendered}");
    Ok(())
}
