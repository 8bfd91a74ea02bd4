mod cache;
mod decode;
mod dispatcher;
mod registry;

pub use cache::PrecheckCache;
pub use dispatcher::{Dispatcher, RemoteFunction};
pub use registry::BackendRegistry;

pub use remote_cloud::{SnapshotBackend, TemplateBackend};
pub use remote_core::{
    Backend, BackendKind, CallTarget, DEFAULT_DEADLINE_MS, Deadline, ExecutionConfig, LocalConfig,
    PayloadGenerator, PythonCall, RemoteError, Result, Shell, SnapshotConfig, TemplateConfig,
};
pub use remote_local::LocalBackend;
