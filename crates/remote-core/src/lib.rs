mod backend;
mod config;
mod envelope;
mod error;
pub mod harness;
mod payload;
mod types;

pub use backend::Backend;
pub use config::{
    BackendKind, DEFAULT_DEADLINE_MS, Deadline, ExecutionConfig, LocalConfig, Shell,
    SnapshotConfig, TemplateConfig,
};
pub use envelope::{ERROR_MARKER, FailureEnvelope};
pub use error::{RemoteError, Result};
pub use harness::{HarnessPlan, HarnessScript, ResultChannel};
pub use payload::{CallTarget, PayloadGenerator, PythonCall};
pub use types::{ExecutionFailure, ExecutionOutcome, FailureKind, preview};
