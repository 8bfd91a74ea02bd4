use async_trait::async_trait;

use crate::config::{BackendKind, Deadline, ExecutionConfig};
use crate::error::Result;
use crate::harness::{HarnessPlan, HarnessScript};
use crate::types::ExecutionOutcome;

/// An execution environment: a local child process or a provisioned sandbox.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable name for this backend (e.g. "local").
    fn name(&self) -> &str;
    /// The configuration variant this backend accepts.
    fn kind(&self) -> BackendKind;
    /// Shell, interpreter and result channel the harness must use.
    ///
    /// The channel is chosen here, by the backend, so the harness and the
    /// generated program always agree on it.
    fn plan(&self, config: &ExecutionConfig) -> Result<HarnessPlan>;
    /// Verify the environment is usable and do any idempotent provisioning
    /// needed before first use. Safe to call concurrently for different
    /// configs; callers guarantee at most one concurrent call per config.
    async fn pre_check(&self, config: &ExecutionConfig) -> Result<()>;
    /// Run `script` to completion or until `deadline`, whichever is first.
    ///
    /// Produces exactly one outcome and releases everything it provisioned on
    /// every path, including when the returned future is dropped.
    async fn execute(
        &self,
        config: &ExecutionConfig,
        script: &HarnessScript,
        deadline: Deadline,
    ) -> ExecutionOutcome;
}
