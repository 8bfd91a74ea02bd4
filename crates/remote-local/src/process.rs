use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Send `signal` to the entire process group of `child`.
///
/// Requires the child to have been spawned with `process_group(0)` so that its
/// PGID equals its PID. No-op if the child has already been reaped or the PID
/// cannot be represented as `i32`. `ESRCH` (group already gone) is ignored.
pub(crate) fn signal_process_group(child: &tokio::process::Child, signal: Signal) {
    if let Some(pid) = child.id() {
        signal_group(pid, signal);
    }
}

/// Same as [`signal_process_group`] for a PID captured before the child was
/// reaped, so stragglers that outlive the shell can still be reclaimed.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
    if let Ok(pid) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(pid), signal);
    }
}
