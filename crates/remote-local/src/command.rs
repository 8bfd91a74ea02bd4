use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

/// A short-lived query (`<shell> --version` and similar) that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program}: no answer within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Run `program` with `args` and return its trimmed stdout.
///
/// The child is killed if `timeout` elapses before it exits.
pub async fn query(program: &Path, args: &[&str], timeout: Duration) -> Result<String, QueryError> {
    let label = program.display().to_string();
    trace!(program = %label, ?args, "query");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Err(_) => return Err(QueryError::Timeout { program: label, timeout }),
        Ok(Err(source)) => return Err(QueryError::Spawn { program: label, source }),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(QueryError::Failed {
            program: label,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
