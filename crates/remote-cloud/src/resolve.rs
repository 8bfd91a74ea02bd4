use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use remote_core::{RemoteError, Result};
use tracing::debug;

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Memoizes credential and image-name resolution per distinct input.
///
/// Only successful resolutions are remembered, so fixing a missing key or
/// manifest takes effect on the next activation.
pub struct Resolver {
    env: EnvLookup,
    api_keys: Mutex<HashMap<(Option<String>, &'static str), String>>,
    images: Mutex<HashMap<(String, Option<String>, PathBuf), String>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_env(|name| std::env::var(name).ok())
    }

    /// Resolver reading fallback variables through `env` instead of the
    /// process environment.
    pub fn with_env(env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            env: Box::new(env),
            api_keys: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// The configured key, else the value of `env_var`.
    pub fn api_key(&self, configured: Option<&str>, env_var: &'static str) -> Result<String> {
        let memo_key = (configured.map(str::to_string), env_var);
        if let Some(key) = lock(&self.api_keys).get(&memo_key) {
            return Ok(key.clone());
        }

        let key = configured
            .map(str::to_string)
            .or_else(|| (self.env)(env_var))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                RemoteError::Configuration(format!(
                    "API key is required; provide it in the config or set {env_var}"
                ))
            })?;

        lock(&self.api_keys).insert(memo_key, key.clone());
        Ok(key)
    }

    /// `{prefix}-v{version}`, with the version read from the project manifest
    /// when not configured.
    pub fn image_name(
        &self,
        prefix: &str,
        version: Option<&str>,
        project_root: &Path,
    ) -> Result<String> {
        let memo_key = (
            prefix.to_string(),
            version.map(str::to_string),
            project_root.to_path_buf(),
        );
        if let Some(name) = lock(&self.images).get(&memo_key) {
            return Ok(name.clone());
        }

        let version = match version {
            Some(v) => v.to_string(),
            None => project_version(project_root)?,
        };
        let name = format!("{prefix}-v{version}");
        debug!(image = %name, "resolved image name");

        lock(&self.images).insert(memo_key, name.clone());
        Ok(name)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Version of the project at `root`: `[project].version` from
/// `pyproject.toml`, else `[package].version` from `Cargo.toml`.
pub fn project_version(root: &Path) -> Result<String> {
    let manifests = [
        ("pyproject.toml", "project"),
        ("Cargo.toml", "package"),
    ];

    for (file, table) in manifests {
        let path = root.join(file);
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        let manifest: toml::Table = text.parse().map_err(|e| {
            RemoteError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        return manifest
            .get(table)
            .and_then(|t| t.get("version"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::Configuration(format!(
                    "no [{table}].version in {}; set an explicit image version",
                    path.display()
                ))
            });
    }

    Err(RemoteError::Configuration(format!(
        "no pyproject.toml or Cargo.toml in project root {}; set an explicit image version",
        root.display()
    )))
}

/// Path of the Dockerfile to build from. Relative paths are taken from the
/// project root.
pub fn build_source(project_root: &Path, dockerfile: Option<&Path>) -> Result<PathBuf> {
    let path = match dockerfile {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => project_root.join(p),
        None => project_root.join(DEFAULT_DOCKERFILE),
    };

    if !path.exists() {
        return Err(RemoteError::Configuration(format!(
            "Dockerfile not found at {}; set dockerfile_path or add a Dockerfile to the project root",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(RemoteError::Configuration(format!(
            "Dockerfile path is not a file: {}",
            path.display()
        )));
    }
    Ok(path)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
