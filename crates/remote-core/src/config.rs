use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result};

/// Default deadline for a single invocation (5 minutes).
pub const DEFAULT_DEADLINE_MS: u64 = 300_000;

pub(crate) const DEFAULT_LOCAL_INTERPRETER: &str = "python3";
pub(crate) const DEFAULT_TEMPLATE_INTERPRETER: &str = "python3";
pub(crate) const DEFAULT_SNAPSHOT_INTERPRETER: &str = "/app/.venv/bin/python";

/// Shell used to run the harness script for the local process backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shell {
    /// Bash 4 or newer (dynamic descriptor assignment).
    Bash4,
    /// Zsh. Default because macOS still ships bash 3.2.
    #[default]
    Zsh,
}

impl Shell {
    pub fn executable(self) -> &'static str {
        match self {
            Self::Bash4 => "bash",
            Self::Zsh => "zsh",
        }
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.executable())
    }
}

/// Discriminant of [`ExecutionConfig`], used as the backend table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Template,
    Snapshot,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Template => f.write_str("template"),
            Self::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// Where and how a unit of work runs.
///
/// Two configurations are "the same" for pre-check purposes when they are
/// structurally equal, so every field that affects environment setup lives
/// here rather than on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionConfig {
    Local(LocalConfig),
    Template(TemplateConfig),
    Snapshot(SnapshotConfig),
}

impl ExecutionConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Template(_) => BackendKind::Template,
            Self::Snapshot(_) => BackendKind::Snapshot,
        }
    }

    pub fn as_local(&self) -> Result<&LocalConfig> {
        match self {
            Self::Local(c) => Ok(c),
            other => Err(wrong_variant(BackendKind::Local, other)),
        }
    }

    pub fn as_template(&self) -> Result<&TemplateConfig> {
        match self {
            Self::Template(c) => Ok(c),
            other => Err(wrong_variant(BackendKind::Template, other)),
        }
    }

    pub fn as_snapshot(&self) -> Result<&SnapshotConfig> {
        match self {
            Self::Snapshot(c) => Ok(c),
            other => Err(wrong_variant(BackendKind::Snapshot, other)),
        }
    }

    /// Resolve a relative project root against `base`.
    ///
    /// Dockerfile paths stay relative to the project root.
    pub fn resolve_relative_paths(&mut self, base: &std::path::Path) {
        let project_root = match self {
            Self::Local(_) => return,
            Self::Template(c) => &mut c.project_root,
            Self::Snapshot(c) => &mut c.project_root,
        };
        if project_root.is_relative() {
            *project_root = base.join(&*project_root);
        }
    }
}

fn wrong_variant(expected: BackendKind, got: &ExecutionConfig) -> RemoteError {
    RemoteError::Configuration(format!(
        "{expected} backend requires a {expected} config, got {}",
        got.kind()
    ))
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::Local(LocalConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub shell: Shell,
    /// Command used to run the generated program (`<interpreter> -`).
    pub interpreter: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            shell: Shell::default(),
            interpreter: DEFAULT_LOCAL_INTERPRETER.into(),
        }
    }
}

/// Sandbox provisioned from a named, versioned template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Falls back to `E2B_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    pub template_prefix: String,
    /// Falls back to the project manifest version when absent.
    #[serde(default)]
    pub template_version: Option<String>,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Relative to `project_root`; defaults to `Dockerfile`.
    #[serde(default)]
    pub dockerfile_path: Option<PathBuf>,
    #[serde(default = "default_template_cpu")]
    pub cpu_count: u32,
    #[serde(default = "default_template_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_template_interpreter")]
    pub interpreter: String,
}

impl TemplateConfig {
    pub fn new(template_prefix: impl Into<String>) -> Self {
        Self {
            api_key: None,
            template_prefix: template_prefix.into(),
            template_version: None,
            project_root: default_project_root(),
            dockerfile_path: None,
            cpu_count: default_template_cpu(),
            memory_mb: default_template_memory_mb(),
            interpreter: default_template_interpreter(),
        }
    }
}

/// Sandbox provisioned from a named, versioned snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Falls back to `DAYTONA_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    pub snapshot_name: String,
    #[serde(default)]
    pub snapshot_version: Option<String>,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default)]
    pub dockerfile_path: Option<PathBuf>,
    #[serde(default = "default_snapshot_cpu")]
    pub cpu_count: u32,
    #[serde(default = "default_snapshot_memory_gb")]
    pub memory_gb: u32,
    #[serde(default = "default_snapshot_disk_gb")]
    pub disk_gb: u32,
    #[serde(default = "default_snapshot_interpreter")]
    pub interpreter: String,
}

impl SnapshotConfig {
    pub fn new(snapshot_name: impl Into<String>) -> Self {
        Self {
            api_key: None,
            snapshot_name: snapshot_name.into(),
            snapshot_version: None,
            project_root: default_project_root(),
            dockerfile_path: None,
            cpu_count: default_snapshot_cpu(),
            memory_gb: default_snapshot_memory_gb(),
            disk_gb: default_snapshot_disk_gb(),
            interpreter: default_snapshot_interpreter(),
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_template_cpu() -> u32 {
    2
}

fn default_template_memory_mb() -> u32 {
    1024
}

fn default_template_interpreter() -> String {
    DEFAULT_TEMPLATE_INTERPRETER.into()
}

fn default_snapshot_cpu() -> u32 {
    1
}

fn default_snapshot_memory_gb() -> u32 {
    1
}

fn default_snapshot_disk_gb() -> u32 {
    3
}

fn default_snapshot_interpreter() -> String {
    DEFAULT_SNAPSHOT_INTERPRETER.into()
}

/// Caller-supplied wall-clock budget for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    millis: u64,
}

impl Deadline {
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn as_millis(self) -> u64 {
        self.millis
    }

    pub fn duration(self) -> Duration {
        Duration::from_millis(self.millis)
    }

    /// Whole seconds for provider APIs, rounded up, never zero.
    pub fn as_secs_ceil(self) -> u64 {
        self.millis.div_ceil(1000).max(1)
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::from_millis(DEFAULT_DEADLINE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_tag_selects_variant() {
        let json = r#"{"type":"local","shell":"bash4"}"#;
        let config: ExecutionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind(), BackendKind::Local);
        let ExecutionConfig::Local(local) = config else {
            panic!("expected local config");
        };
        assert_eq!(local.shell, Shell::Bash4);
        assert_eq!(local.interpreter, "python3");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let json = r#"{"type":"kubernetes"}"#;
        assert!(serde_json::from_str::<ExecutionConfig>(json).is_err());
    }

    #[test]
    fn snapshot_defaults() {
        let json = r#"{"type":"snapshot","snapshot_name":"worker"}"#;
        let config: ExecutionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config,
            ExecutionConfig::Snapshot(SnapshotConfig::new("worker"))
        );
    }

    #[test]
    fn structural_equality_ignores_identity() {
        let a = ExecutionConfig::Template(TemplateConfig::new("app"));
        let b = ExecutionConfig::Template(TemplateConfig::new("app"));
        assert_eq!(a, b);

        let mut sized = TemplateConfig::new("app");
        sized.cpu_count = 8;
        assert_ne!(a, ExecutionConfig::Template(sized));
    }

    #[test]
    fn relative_project_root_resolved_against_base() {
        let mut config = ExecutionConfig::Snapshot(SnapshotConfig::new("worker"));
        config.resolve_relative_paths(std::path::Path::new("/srv/app"));
        let ExecutionConfig::Snapshot(snapshot) = config else {
            panic!("expected snapshot config");
        };
        assert_eq!(snapshot.project_root, PathBuf::from("/srv/app/."));
    }

    #[test]
    fn wrong_variant_is_configuration_error() {
        let config = ExecutionConfig::default();
        assert!(config.as_local().is_ok());
        let err = config.as_snapshot().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: snapshot backend requires a snapshot config, got local"
        );
    }

    #[test]
    fn deadline_seconds_round_up() {
        assert_eq!(Deadline::from_millis(100).as_secs_ceil(), 1);
        assert_eq!(Deadline::from_millis(1000).as_secs_ceil(), 1);
        assert_eq!(Deadline::from_millis(1001).as_secs_ceil(), 2);
        assert_eq!(Deadline::from_millis(0).as_secs_ceil(), 1);
    }
}
