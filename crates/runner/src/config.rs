use std::path::Path;

use remote::{DEFAULT_DEADLINE_MS, Deadline, ExecutionConfig};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub backend: ExecutionConfig,
    /// Deadline for each run, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_DEADLINE_MS
}

impl RunnerConfig {
    pub fn deadline(&self) -> Deadline {
        Deadline::from_millis(self.timeout_ms)
    }
}

/// Load a runner config from a YAML file.
///
/// A relative project root is resolved against the config file's parent directory.
pub async fn load(path: &Path) -> RunnerResult<RunnerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: RunnerConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| RunnerError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.backend.resolve_relative_paths(config_dir);
    }
    if config.timeout_ms == 0 {
        return Err(RunnerError::Config(format!(
            "timeout_ms must be positive in {}",
            path.display()
        )));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use remote::{LocalConfig, Shell, SnapshotConfig, TemplateConfig};

    use super::*;

    async fn write_config(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("remote.yaml");
        tokio::fs::write(&path, yaml).await.unwrap();
        path
    }

    #[tokio::test]
    async fn load_local_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
backend:
  type: local
  shell: bash4
  interpreter: python3.12
timeout_ms: 60000
"#,
        )
        .await;

        let config = load(&path).await.unwrap();
        assert_eq!(
            config,
            RunnerConfig {
                backend: ExecutionConfig::Local(LocalConfig {
                    shell: Shell::Bash4,
                    interpreter: "python3.12".into(),
                }),
                timeout_ms: 60_000,
            }
        );
        assert_eq!(config.deadline(), Deadline::from_millis(60_000));
    }

    #[tokio::test]
    async fn load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "backend:\n  type: local\n").await;

        let config = load(&path).await.unwrap();
        assert_eq!(config.backend, ExecutionConfig::default());
        assert_eq!(config.timeout_ms, DEFAULT_DEADLINE_MS);
    }

    #[tokio::test]
    async fn template_project_root_resolved_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
backend:
  type: template
  template_prefix: resize
  project_root: app
  dockerfile_path: docker/Dockerfile
  memory_mb: 2048
"#,
        )
        .await;

        let config = load(&path).await.unwrap();
        let mut expected = TemplateConfig::new("resize");
        expected.project_root = dir.path().join("app");
        expected.dockerfile_path = Some("docker/Dockerfile".into());
        expected.memory_mb = 2048;
        assert_eq!(config.backend, ExecutionConfig::Template(expected));
    }

    #[tokio::test]
    async fn absolute_project_root_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
backend:
  type: snapshot
  snapshot_name: worker
  snapshot_version: "2"
  project_root: /srv/worker
"#,
        )
        .await;

        let config = load(&path).await.unwrap();
        let mut expected = SnapshotConfig::new("worker");
        expected.snapshot_version = Some("2".into());
        expected.project_root = PathBuf::from("/srv/worker");
        assert_eq!(config.backend, ExecutionConfig::Snapshot(expected));
    }

    #[tokio::test]
    async fn unknown_backend_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "backend:\n  type: lambda\n").await;
        let err = load(&path).await.unwrap_err();
        assert!(err.to_string().contains("parse"), "got: {err}");
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "backend:\n  type: local\ntimeout_ms: 0\n").await;
        let err = load(&path).await.unwrap_err();
        assert!(err.to_string().contains("timeout_ms"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/remote.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));
    }
}
