use std::sync::Arc;

use async_trait::async_trait;
use remote_core::{
    Backend, BackendKind, Deadline, ExecutionConfig, ExecutionOutcome, HarnessPlan, HarnessScript,
    Result, TemplateConfig,
};

use crate::e2b::E2bProvider;
use crate::provider::{Provider, Resources};
use crate::provisioned::{Provisioner, SandboxSpec};
use crate::resolve::Resolver;

/// Sandboxes created from a named, versioned template.
pub struct TemplateBackend {
    inner: Provisioner,
}

impl TemplateBackend {
    /// Backed by the hosted E2B API.
    pub fn new() -> Result<Self> {
        Ok(Self::with_provider(Arc::new(E2bProvider::new()?)))
    }

    pub fn with_provider(provider: Arc<dyn Provider>) -> Self {
        Self::with_parts(provider, Resolver::new())
    }

    pub fn with_parts(provider: Arc<dyn Provider>, resolver: Resolver) -> Self {
        Self {
            inner: Provisioner::new(provider, resolver),
        }
    }
}

fn spec(config: &TemplateConfig) -> SandboxSpec<'_> {
    SandboxSpec {
        api_key: config.api_key.as_deref(),
        image_prefix: &config.template_prefix,
        image_version: config.template_version.as_deref(),
        project_root: &config.project_root,
        dockerfile_path: config.dockerfile_path.as_deref(),
        resources: Resources {
            cpu_count: config.cpu_count,
            memory_mb: config.memory_mb,
            disk_gb: None,
        },
        interpreter: &config.interpreter,
    }
}

#[async_trait]
impl Backend for TemplateBackend {
    fn name(&self) -> &str {
        self.inner.provider_name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Template
    }

    fn plan(&self, config: &ExecutionConfig) -> Result<HarnessPlan> {
        Ok(self.inner.plan(&spec(config.as_template()?)))
    }

    async fn pre_check(&self, config: &ExecutionConfig) -> Result<()> {
        self.inner.pre_check(&spec(config.as_template()?)).await
    }

    async fn execute(
        &self,
        config: &ExecutionConfig,
        script: &HarnessScript,
        deadline: Deadline,
    ) -> ExecutionOutcome {
        match config.as_template() {
            Ok(config) => self.inner.execute(&spec(config), script, deadline).await,
            Err(e) => ExecutionOutcome::remote_fault(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use remote_core::{FailureKind, RemoteError, SnapshotConfig, harness};

    use super::*;
    use crate::testing::FakeProvider;

    fn backend(provider: &Arc<FakeProvider>) -> TemplateBackend {
        TemplateBackend::with_parts(provider.clone(), Resolver::with_env(|_| None))
    }

    #[tokio::test]
    async fn template_config_is_sized_in_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM python:3.12\n").unwrap();
        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[project]\nversion = \"0.9.0\"\n",
        )
        .unwrap();

        let mut config = TemplateConfig::new("svc");
        config.api_key = Some("key".into());
        config.project_root = dir.path().to_path_buf();
        config.memory_mb = 2048;

        let provider = Arc::new(FakeProvider::default());
        backend(&provider)
            .pre_check(&ExecutionConfig::Template(config))
            .await
            .unwrap();

        let built = provider.built();
        assert_eq!(built[0].name, "svc-v0.9.0");
        assert_eq!(
            built[0].resources,
            Resources {
                cpu_count: 2,
                memory_mb: 2048,
                disk_gb: None
            }
        );
    }

    #[tokio::test]
    async fn missing_api_key_is_configuration_error() {
        let provider = Arc::new(FakeProvider::default());
        let err = backend(&provider)
            .pre_check(&ExecutionConfig::Template(TemplateConfig::new("svc")))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Configuration(ref m) if m.contains("FAKE_API_KEY")));
    }

    #[tokio::test]
    async fn snapshot_config_is_rejected() {
        let provider = Arc::new(FakeProvider::default());
        let backend = backend(&provider);
        let config = ExecutionConfig::Snapshot(SnapshotConfig::new("x"));

        assert!(backend.plan(&config).is_err());
        let script = harness::render(
            &backend
                .plan(&ExecutionConfig::Template(TemplateConfig::new("svc")))
                .unwrap(),
            "",
        );
        let outcome = backend
            .execute(&config, &script, Deadline::from_millis(1_000))
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::RemoteFault));
        assert!(provider.created().is_empty());
    }
}
