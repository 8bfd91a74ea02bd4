//! Wire contract between the host and the isolated environment.
//!
//! The harness script runs the generated program with its stdout folded into
//! stderr, so user logging can never be mistaken for the result. The result
//! travels over a separate channel named by an environment variable.

/// Names the inherited descriptor the entrypoint writes its result to.
pub const IPC_FD_ENV: &str = "REMOTE_EXECUTION_IPC_FD";
/// Names the file the entrypoint writes its result to.
pub const RESULT_FILE_ENV: &str = "REMOTE_EXECUTION_RESULT_FILE";
/// Set to `1` inside remote execution; see the dispatcher's re-entrancy check.
pub const EXECUTION_MODE_ENV: &str = "REMOTE_EXECUTION_MODE";

/// How the entrypoint hands its result back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultChannel {
    /// The harness duplicates its stdout into a fresh descriptor and exports
    /// its number. Requires a shared descriptor table (local process).
    InheritedDescriptor,
    /// The entrypoint writes to this path; the harness copies it to stdout
    /// after the program exits. Used where only stdout and the exit code are
    /// observable.
    SharedFile(String),
}

impl ResultChannel {
    /// Environment variable the entrypoint must read for this channel.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::InheritedDescriptor => IPC_FD_ENV,
            Self::SharedFile(_) => RESULT_FILE_ENV,
        }
    }
}

/// Everything a backend decides about how its harness runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessPlan {
    /// Shell executable named in the shebang.
    pub shell: String,
    /// Command that runs the program text fed on stdin.
    pub interpreter: String,
    pub channel: ResultChannel,
}

/// Rendered harness, ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct HarnessScript {
    text: String,
    channel: ResultChannel,
}

impl HarnessScript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn channel(&self) -> &ResultChannel {
        &self.channel
    }
}

/// Render the harness script for `plan` around `program`.
///
/// The program is embedded in a quoted here-document whose delimiter is
/// unique per render, so its text is never expanded by the shell.
pub fn render(plan: &HarnessPlan, program: &str) -> HarnessScript {
    let delimiter = format!("REMOTE_EXEC_PROGRAM_{}", uuid::Uuid::new_v4().simple());
    let interpreter = shell_quote(&plan.interpreter);

    let mut text = format!(
        "#!/usr/bin/env {shell}\nexport {mode}=1\n",
        shell = plan.shell,
        mode = EXECUTION_MODE_ENV,
    );

    match &plan.channel {
        ResultChannel::InheritedDescriptor => {
            // Entrypoint's exit status is the last command's, hence the script's.
            text.push_str(&format!(
                "exec {{remote_ipc_fd}}>&1\n\
                 export {fd_env}=\"$remote_ipc_fd\"\n\
                 {interpreter} - 1>&2 <<'{delimiter}'\n\
                 {program}\n\
                 {delimiter}\n",
                fd_env = IPC_FD_ENV,
            ));
        }
        ResultChannel::SharedFile(path) => {
            text.push_str(&format!(
                "export {file_env}={path}\n\
                 rm -f \"${file_env}\"\n\
                 {interpreter} - 1>&2 <<'{delimiter}'\n\
                 {program}\n\
                 {delimiter}\n\
                 remote_status=$?\n\
                 if [ -f \"${file_env}\" ]; then cat \"${file_env}\"; fi\n\
                 exit \"$remote_status\"\n",
                file_env = RESULT_FILE_ENV,
                path = shell_quote(path),
            ));
        }
    }

    HarnessScript {
        text,
        channel: plan.channel.clone(),
    }
}

/// Single-quote `value` for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
