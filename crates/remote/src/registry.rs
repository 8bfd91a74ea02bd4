use std::collections::HashMap;
use std::sync::Arc;

use remote_cloud::{SnapshotBackend, TemplateBackend};
use remote_core::{Backend, BackendKind, RemoteError, Result};
use remote_local::LocalBackend;

/// Maps each configuration kind to the backend that runs it.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// A registry with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local process, template sandbox and snapshot sandbox backends.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalBackend::new()));
        registry.register(Arc::new(TemplateBackend::new()?));
        registry.register(Arc::new(SnapshotBackend::new()?));
        Ok(registry)
    }

    /// Bind `backend` to the kind it reports, returning the one it replaced.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        self.backends.insert(backend.kind(), backend)
    }

    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn Backend>> {
        self.backends.get(&kind).cloned().ok_or_else(|| {
            RemoteError::Configuration(format!("no backend registered for {kind} configs"))
        })
    }
}
