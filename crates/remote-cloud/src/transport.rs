use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Command that reconstructs `script` from base64 in a temp file and runs it
/// with bash.
///
/// Used when the provider runs commands through `sh`, which ignores the
/// shebang and lacks bash syntax. The base64 alphabet needs no quoting.
/// These command surfaces return one merged output stream, so the script's
/// stderr is kept in a log file beside it and only the result reaches it.
pub fn encode_for_sh(script: &str) -> String {
    let encoded = STANDARD.encode(script.as_bytes());
    let stem = format!("/tmp/remote_exec_harness_{}", uuid::Uuid::new_v4().simple());
    format!("printf '%s' '{encoded}' | base64 -d > {stem}.sh && bash {stem}.sh 2> {stem}.log")
}
