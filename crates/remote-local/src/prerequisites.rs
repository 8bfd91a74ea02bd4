use std::time::Duration;

use remote_core::{LocalConfig, RemoteError, Shell};
use tracing::debug;

use crate::command::query;

/// Bound on `<shell> --version`.
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// First bash major version with `{var}>&1` dynamic descriptor assignment.
const MIN_BASH_MAJOR: u32 = 4;

/// Verify the configured shell and interpreter can run the harness.
///
/// Checks the shell is on `PATH`, that bash is new enough for dynamic
/// descriptor assignment, and that the interpreter resolves.
pub async fn check_prerequisites(config: &LocalConfig) -> Result<(), RemoteError> {
    let shell = config.shell.executable();
    let path = which::which(shell).map_err(|_| {
        RemoteError::EnvironmentUnavailable(format!(
            "shell '{shell}' not found in PATH; install {shell} or use a different shell configuration"
        ))
    })?;

    match config.shell {
        Shell::Bash4 => {
            let output = query(&path, &["--version"], VERSION_TIMEOUT)
                .await
                .map_err(|e| {
                    RemoteError::EnvironmentUnavailable(format!("failed to verify bash version: {e}"))
                })?;
            if let Some((major, minor)) = parse_bash_version(&output) {
                debug!(major, minor, "bash version");
                if major < MIN_BASH_MAJOR {
                    return Err(RemoteError::EnvironmentUnavailable(format!(
                        "bash {major}.{minor} does not support dynamic file descriptor assignment; \
                         install bash 4+ or switch to the zsh shell configuration"
                    )));
                }
            }
        }
        // Zsh has supported dynamic descriptors since before 4.0.
        Shell::Zsh => {
            query(&path, &["--version"], VERSION_TIMEOUT)
                .await
                .map_err(|e| {
                    RemoteError::EnvironmentUnavailable(format!("failed to verify zsh installation: {e}"))
                })?;
        }
    }

    if which::which(&config.interpreter).is_err() {
        return Err(RemoteError::EnvironmentUnavailable(format!(
            "interpreter '{}' not found",
            config.interpreter
        )));
    }

    Ok(())
}

/// Parse `(major, minor)` from output like `GNU bash, version 5.2.15(1)-release`.
pub(crate) fn parse_bash_version(output: &str) -> Option<(u32, u32)> {
    let rest = output.split("version ").nth(1)?;
    let mut parts = rest.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
