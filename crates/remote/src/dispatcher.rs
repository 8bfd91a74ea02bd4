use std::sync::Arc;

use async_trait::async_trait;
use remote_core::harness::{self, EXECUTION_MODE_ENV};
use remote_core::{
    Backend, CallTarget, Deadline, ExecutionConfig, PayloadGenerator, PythonCall, RemoteError,
    Result,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::cache::PrecheckCache;
use crate::decode::decode;
use crate::registry::BackendRegistry;

/// A function that can run either in-process or in an execution backend.
#[async_trait]
pub trait RemoteFunction: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: DeserializeOwned + Send;

    /// What the generated program imports and calls.
    fn target(&self) -> CallTarget;

    /// Run the function directly. Used when already inside remote execution.
    async fn call_local(&self, input: Self::Input) -> Result<Self::Output>;
}

/// Routes calls to backends, pre-checking each distinct config once.
pub struct Dispatcher {
    registry: BackendRegistry,
    cache: PrecheckCache,
    generator: Arc<dyn PayloadGenerator>,
    reentrant: bool,
}

impl Dispatcher {
    /// Uses the Python payload generator. Re-entrancy is taken from the
    /// process environment.
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            cache: PrecheckCache::new(),
            generator: Arc::new(PythonCall),
            reentrant: running_remotely(),
        }
    }

    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(BackendRegistry::with_defaults()?))
    }

    pub fn with_generator(mut self, generator: Arc<dyn PayloadGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Override the detected re-entrancy.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    /// Whether calls run in-process because this process is itself remote.
    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    /// Make sure `config`'s backend is usable, running its pre-check at most
    /// once per distinct config.
    pub async fn activate(&self, config: &ExecutionConfig) -> Result<()> {
        let backend = self.registry.get(config.kind())?;
        self.cache
            .ensure(config, || async {
                info!(backend = backend.name(), kind = %config.kind(), "running pre-check");
                backend.pre_check(config).await
            })
            .await
    }

    /// Call `function` with `input` in the backend `config` selects.
    pub async fn call<F: RemoteFunction>(
        &self,
        config: &ExecutionConfig,
        function: &F,
        input: F::Input,
        deadline: Deadline,
    ) -> Result<F::Output> {
        if self.reentrant {
            debug!("already in remote execution, calling in-process");
            return function.call_local(input).await;
        }

        let backend = self.prepare(config).await?;
        let plan = backend.plan(config)?;
        let argument = serde_json::to_string(&input).map_err(|e| {
            RemoteError::Configuration(format!("failed to serialize call input: {e}"))
        })?;
        let program = self
            .generator
            .generate(&function.target(), &argument, &plan.channel)?;

        let script = harness::render(&plan, &program);
        debug!(backend = backend.name(), timeout_ms = deadline.as_millis(), "executing call");
        decode(backend.execute(config, &script, deadline).await)
    }

    /// Run caller-supplied program text, decoding its result document as
    /// JSON. The program must report through the result channel itself.
    pub async fn run_program(
        &self,
        config: &ExecutionConfig,
        program: &str,
        deadline: Deadline,
    ) -> Result<serde_json::Value> {
        let backend = self.prepare(config).await?;
        let plan = backend.plan(config)?;
        let script = harness::render(&plan, program);
        debug!(backend = backend.name(), timeout_ms = deadline.as_millis(), "executing program");
        decode(backend.execute(config, &script, deadline).await)
    }

    async fn prepare(&self, config: &ExecutionConfig) -> Result<Arc<dyn Backend>> {
        self.activate(config).await?;
        self.registry.get(config.kind())
    }
}

fn running_remotely() -> bool {
    std::env::var(EXECUTION_MODE_ENV).is_ok_and(|value| value == "1")
}
