use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use remote_core::{
    Deadline, ExecutionOutcome, HarnessPlan, HarnessScript, RemoteError, Result, ResultChannel,
};
use tracing::{debug, info, warn};

use crate::context::BuildContext;
use crate::error::ProviderError;
use crate::lease::InstanceLease;
use crate::provider::{CommandOutput, ImageRequest, Instance, Provider, Resources};
use crate::resolve::{Resolver, build_source};
use crate::transport::encode_for_sh;

/// Where the entrypoint writes its result inside the sandbox. Every
/// invocation gets a fresh instance, so a fixed path cannot collide.
pub(crate) const RESULT_FILE: &str = "/tmp/remote_execution_result.json";

const HARNESS_SHELL: &str = "bash";

/// The parts of a sandbox config the shared provisioning path needs.
pub(crate) struct SandboxSpec<'a> {
    pub api_key: Option<&'a str>,
    pub image_prefix: &'a str,
    pub image_version: Option<&'a str>,
    pub project_root: &'a Path,
    pub dockerfile_path: Option<&'a Path>,
    pub resources: Resources,
    pub interpreter: &'a str,
}

/// Pre-check and execute logic shared by every provisioned sandbox backend.
pub(crate) struct Provisioner {
    provider: Arc<dyn Provider>,
    resolver: Resolver,
}

impl Provisioner {
    pub fn new(provider: Arc<dyn Provider>, resolver: Resolver) -> Self {
        Self { provider, resolver }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn plan(&self, spec: &SandboxSpec<'_>) -> HarnessPlan {
        HarnessPlan {
            shell: HARNESS_SHELL.to_string(),
            interpreter: spec.interpreter.to_string(),
            channel: ResultChannel::SharedFile(RESULT_FILE.to_string()),
        }
    }

    /// Resolve credentials and image, then make sure the image exists,
    /// building it from the project's Dockerfile if it does not.
    pub async fn pre_check(&self, spec: &SandboxSpec<'_>) -> Result<()> {
        let api_key = self
            .resolver
            .api_key(spec.api_key, self.provider.api_key_env())?;
        let dockerfile = build_source(spec.project_root, spec.dockerfile_path)?;
        let image = self
            .resolver
            .image_name(spec.image_prefix, spec.image_version, spec.project_root)?;

        if self.provider.image_exists(&api_key, &image).await? {
            info!(provider = self.provider.name(), image = %image, "image already exists");
            return Ok(());
        }

        info!(provider = self.provider.name(), image = %image, "image does not exist, building");
        let contents = tokio::fs::read_to_string(&dockerfile).await.map_err(|e| {
            RemoteError::Configuration(format!("failed to read {}: {e}", dockerfile.display()))
        })?;
        let context = BuildContext::pack(spec.project_root)
            .await
            .map_err(|e| RemoteError::Configuration(e.to_string()))?;
        let request = ImageRequest {
            name: image.clone(),
            dockerfile: contents,
            context,
            resources: spec.resources,
        };

        let logs = |line: &str| info!(image = %image, "build: {line}");
        self.provider.build_image(&api_key, &request, &logs).await?;

        info!(provider = self.provider.name(), image = %image, "image built");
        Ok(())
    }

    /// Run `script` in a fresh instance within `deadline`. The instance is
    /// destroyed before this returns on every path.
    pub async fn execute(
        &self,
        spec: &SandboxSpec<'_>,
        script: &HarnessScript,
        deadline: Deadline,
    ) -> ExecutionOutcome {
        let started = Instant::now();

        let (api_key, image) = match self.resolve(spec) {
            Ok(resolved) => resolved,
            Err(e) => return ExecutionOutcome::remote_fault(e.to_string()),
        };

        // The create request runs as its own task so that a response arriving
        // after the deadline still yields an id to destroy.
        let mut create = {
            let provider = Arc::clone(&self.provider);
            let (api_key, image, resources) = (api_key.clone(), image.clone(), spec.resources);
            tokio::spawn(async move {
                provider
                    .create_instance(&api_key, &image, &resources, deadline.duration())
                    .await
            })
        };
        let instance = match tokio::time::timeout(deadline.duration(), &mut create).await {
            Ok(Ok(Ok(instance))) => instance,
            Ok(Ok(Err(e))) => return provider_failure("create instance", e, deadline),
            Ok(Err(e)) => {
                return ExecutionOutcome::remote_fault(format!("create instance task failed: {e}"));
            }
            Err(_) => {
                self.reap_late_instance(create, api_key);
                return timed_out(deadline);
            }
        };
        info!(provider = self.provider.name(), image = %image, instance = %instance.id, "instance created");

        let mut lease = InstanceLease::new(Arc::clone(&self.provider), api_key.clone(), instance.clone());
        let outcome = self
            .run_in(&api_key, &instance, script, started, deadline)
            .await;
        lease.release().await;
        outcome
    }

    /// Destroy whatever a create request that outlived its deadline returns.
    fn reap_late_instance(
        &self,
        create: tokio::task::JoinHandle<crate::error::ProviderResult<Instance>>,
        api_key: String,
    ) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Ok(Ok(instance)) = create.await {
                warn!(instance = %instance.id, "instance created after deadline, destroying");
                InstanceLease::new(provider, api_key, instance).release().await;
            }
        });
    }

    fn resolve(&self, spec: &SandboxSpec<'_>) -> Result<(String, String)> {
        let api_key = self
            .resolver
            .api_key(spec.api_key, self.provider.api_key_env())?;
        let image = self
            .resolver
            .image_name(spec.image_prefix, spec.image_version, spec.project_root)?;
        Ok((api_key, image))
    }

    async fn run_in(
        &self,
        api_key: &str,
        instance: &Instance,
        script: &HarnessScript,
        started: Instant,
        deadline: Deadline,
    ) -> ExecutionOutcome {
        let Some(budget) = remaining(started, deadline) else {
            return timed_out(deadline);
        };
        match tokio::time::timeout(budget, self.provider.wait_ready(api_key, instance, budget)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return provider_failure("wait for instance", e, deadline),
            Err(_) => return timed_out(deadline),
        }

        let command = if self.provider.preserves_interpreter() {
            script.text().to_string()
        } else {
            encode_for_sh(script.text())
        };

        let Some(budget) = remaining(started, deadline) else {
            return timed_out(deadline);
        };
        debug!(instance = %instance.id, budget_ms = budget.as_millis(), "running harness");
        match tokio::time::timeout(
            budget,
            self.provider
                .run_command(api_key, instance, &command, budget),
        )
        .await
        {
            Ok(Ok(output)) => on_exit(output),
            Ok(Err(e)) => provider_failure("run command", e, deadline),
            Err(_) => timed_out(deadline),
        }
    }
}

fn remaining(started: Instant, deadline: Deadline) -> Option<Duration> {
    deadline
        .duration()
        .checked_sub(started.elapsed())
        .filter(|d| !d.is_zero())
}

fn on_exit(output: CommandOutput) -> ExecutionOutcome {
    if output.exit_code != 0 {
        debug!(code = output.exit_code, "harness exited with failure");
        let message = format!("stdout: {}\nstderr: {}", output.stdout, output.stderr);
        return ExecutionOutcome::non_zero_exit(
            Some(output.exit_code),
            message,
            Some(output.stdout.into_bytes()),
        );
    }
    if output.stdout.trim().is_empty() {
        return ExecutionOutcome::channel_error(
            "program exited cleanly without writing a result document",
        );
    }
    ExecutionOutcome::Success(output.stdout.into_bytes())
}

fn timed_out(deadline: Deadline) -> ExecutionOutcome {
    info!(timeout_ms = deadline.as_millis(), "remote execution timed out");
    ExecutionOutcome::timeout(format!(
        "remote execution exceeded timeout of {}ms.",
        deadline.as_millis()
    ))
}

fn provider_failure(step: &str, e: ProviderError, deadline: Deadline) -> ExecutionOutcome {
    if matches!(e, ProviderError::Timeout(_)) {
        return timed_out(deadline);
    }
    warn!(step, error = %e, "sandbox provider failed");
    ExecutionOutcome::remote_fault(format!("{step}: {e}"))
}
