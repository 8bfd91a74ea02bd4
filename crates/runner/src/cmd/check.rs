use std::path::PathBuf;

use clap::Args;
use remote::Dispatcher;
use tracing::info;

use crate::config;
use crate::error::RunnerResult;

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the runner YAML config
    #[arg(long, short, env = "REMOTE_RUNNER_CONFIG")]
    config: PathBuf,
}

/// Verify the configured backend is usable, building its image if needed.
pub async fn run_check(args: CheckArgs) -> RunnerResult<()> {
    let runner_config = config::load(&args.config).await?;
    let kind = runner_config.backend.kind();

    let dispatcher = Dispatcher::with_defaults()?;
    dispatcher.activate(&runner_config.backend).await?;

    info!(backend = %kind, "backend ready");
    Ok(())
}
