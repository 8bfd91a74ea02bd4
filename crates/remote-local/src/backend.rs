use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use remote_core::harness::EXECUTION_MODE_ENV;
use remote_core::{
    Backend, BackendKind, Deadline, ExecutionConfig, ExecutionOutcome, HarnessPlan, HarnessScript,
    LocalConfig, ResultChannel, preview,
};
use tracing::{debug, info, warn};

use crate::capture::OutputCapture;
use crate::prerequisites::check_prerequisites;
use crate::process::{signal_group, signal_process_group};

/// Grace window for draining output after a timeout kill.
const PARTIAL_OUTPUT_GRACE: Duration = Duration::from_millis(1);

/// Bound on collecting output after the harness exited. Only exceeded when
/// a detached descendant still holds a pipe open.
const POST_EXIT_DRAIN: Duration = Duration::from_secs(5);

/// Partial stdout/stderr are truncated to this many characters in errors.
const PREVIEW_CHARS: usize = 500;

/// Runs the harness as a child process of the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn plan(&self, config: &ExecutionConfig) -> remote_core::Result<HarnessPlan> {
        let config = config.as_local()?;
        Ok(HarnessPlan {
            shell: config.shell.executable().to_string(),
            interpreter: config.interpreter.clone(),
            channel: ResultChannel::InheritedDescriptor,
        })
    }

    async fn pre_check(&self, config: &ExecutionConfig) -> remote_core::Result<()> {
        let config = config.as_local()?;
        check_prerequisites(config).await?;
        info!(shell = %config.shell, interpreter = %config.interpreter, "local backend ready");
        Ok(())
    }

    async fn execute(
        &self,
        config: &ExecutionConfig,
        script: &HarnessScript,
        deadline: Deadline,
    ) -> ExecutionOutcome {
        let config = match config.as_local() {
            Ok(config) => config,
            Err(e) => return ExecutionOutcome::remote_fault(e.to_string()),
        };
        if script.channel() != &ResultChannel::InheritedDescriptor {
            return ExecutionOutcome::remote_fault(
                "local backend requires the inherited descriptor result channel",
            );
        }
        run(config, script, deadline).await
    }
}

async fn run(config: &LocalConfig, script: &HarnessScript, deadline: Deadline) -> ExecutionOutcome {
    let shell = config.shell.executable();

    // Own process group so a timeout kill reaches everything the harness
    // started; kill_on_drop covers the caller dropping this future.
    let mut child = match tokio::process::Command::new(shell)
        .arg("-c")
        .arg(script.text())
        .env(EXECUTION_MODE_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ExecutionOutcome::remote_fault(format!("spawn {shell}: {e}")),
    };
    let pid = child.id();
    debug!(pid = ?pid, shell, "harness started");

    // The harness's stdout is the result channel; user output lands on stderr.
    let channel = OutputCapture::start(child.stdout.take());
    let stderr = OutputCapture::start(child.stderr.take());

    let status = match tokio::time::timeout(deadline.duration(), child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            signal_process_group(&child, Signal::SIGKILL);
            let _ = child.wait().await;
            return ExecutionOutcome::remote_fault(format!("wait for {shell}: {e}"));
        }
        Err(_) => return on_timeout(child, channel, stderr, deadline).await,
    };

    // Reclaim anything the harness left running in its group.
    if let Some(pid) = pid {
        signal_group(pid, Signal::SIGKILL);
    }

    let stderr = stderr.drain(POST_EXIT_DRAIN).await.unwrap_or_default();
    let channel = channel.finish(POST_EXIT_DRAIN).await;
    on_exit(status, channel, &stderr)
}

fn on_exit(
    status: ExitStatus,
    channel: std::io::Result<Vec<u8>>,
    stderr: &[u8],
) -> ExecutionOutcome {
    if !status.success() {
        let stderr = String::from_utf8_lossy(stderr).into_owned();
        debug!(code = ?status.code(), "harness exited with failure");
        return ExecutionOutcome::non_zero_exit(status.code(), stderr, channel.ok());
    }

    match channel {
        Ok(document) if document.iter().all(u8::is_ascii_whitespace) => {
            ExecutionOutcome::channel_error(
                "program exited cleanly without writing a result document",
            )
        }
        Ok(document) => ExecutionOutcome::Success(document),
        Err(e) => ExecutionOutcome::channel_error(format!("read result channel: {e}")),
    }
}

/// Kill immediately, salvage what output drains within the grace window, and
/// escalate if it does not.
async fn on_timeout(
    mut child: tokio::process::Child,
    channel: OutputCapture,
    stderr: OutputCapture,
    deadline: Deadline,
) -> ExecutionOutcome {
    signal_process_group(&child, Signal::SIGKILL);

    let drained = tokio::time::timeout(PARTIAL_OUTPUT_GRACE, async {
        (
            channel.drain(PARTIAL_OUTPUT_GRACE).await,
            stderr.drain(PARTIAL_OUTPUT_GRACE).await,
        )
    })
    .await;

    let partial = match drained {
        Ok((Some(stdout), Some(stderr))) => format!(
            "\nPartial stdout: {}\nPartial stderr: {}",
            preview(&stdout, PREVIEW_CHARS),
            preview(&stderr, PREVIEW_CHARS),
        ),
        _ => {
            signal_process_group(&child, Signal::SIGTERM);
            String::new()
        }
    };

    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap timed out harness");
    }

    info!(timeout_ms = deadline.as_millis(), "remote execution timed out");
    ExecutionOutcome::timeout(format!(
        "remote execution exceeded timeout of {}ms.{partial}",
        deadline.as_millis()
    ))
}
