use std::sync::Arc;

use async_trait::async_trait;
use remote_core::{
    Backend, BackendKind, Deadline, ExecutionConfig, ExecutionOutcome, HarnessPlan, HarnessScript,
    Result, SnapshotConfig,
};

use crate::daytona::DaytonaProvider;
use crate::provider::{Provider, Resources};
use crate::provisioned::{Provisioner, SandboxSpec};
use crate::resolve::Resolver;

/// Sandboxes created from a named, versioned snapshot.
pub struct SnapshotBackend {
    inner: Provisioner,
}

impl SnapshotBackend {
    /// Backed by the hosted Daytona API.
    pub fn new() -> Result<Self> {
        Ok(Self::with_provider(Arc::new(DaytonaProvider::new()?)))
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

fn spec(config: &SnapshotConfig) -> SandboxSpec<'_> {
    SandboxSpec {
        api_key: config.api_key.as_deref(),
        image_prefix: &config.snapshot_name,
        image_version: config.snapshot_version.as_deref(),
        project_root: &config.project_root,
        dockerfile_path: config.dockerfile_path.as_deref(),
        resources: Resources {
            cpu_count: config.cpu_count,
            memory_mb: config.memory_gb.saturating_mul(1024),
            disk_gb: Some(config.disk_gb),
        },
        interpreter: &config.interpreter,
    }
}

#[async_trait]
impl Backend for SnapshotBackend {
    fn name(&self) -> &str {
        self.inner.provider_name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Snapshot
    }

    fn plan(&self, config: &ExecutionConfig) -> Result<HarnessPlan> {
        Ok(self.inner.plan(&spec(config.as_snapshot()?)))
    }

    async fn pre_check(&self, config: &ExecutionConfig) -> Result<()> {
        self.inner.pre_check(&spec(config.as_snapshot()?)).await
    }

    async fn execute(
        &self,
        config: &ExecutionConfig,
        script: &HarnessScript,
        deadline: Deadline,
    ) -> ExecutionOutcome {
        match config.as_snapshot() {
            Ok(config) => self.inner.execute(&spec(config), script, deadline).await,
            Err(e) => ExecutionOutcome::remote_fault(e.to_string()),
        }
    }
}
