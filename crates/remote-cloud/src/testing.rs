//! In-memory provider for exercising the provisioning path.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CommandOutput, ImageRequest, Instance, LogSink, Provider, Resources};

pub(crate) struct FakeProvider {
    pub image_exists: bool,
    pub preserves_interpreter: bool,
    pub fail_build: bool,
    pub fail_create: bool,
    pub fail_ready: bool,
    pub fail_command: bool,
    pub fail_destroy: bool,
    pub create_delay: Duration,
    pub command_delay: Duration,
    pub output: CommandOutput,
    pub(crate) queries: AtomicUsize,
    pub(crate) built: Mutex<Vec<ImageRequest>>,
    pub(crate) created: Mutex<Vec<String>>,
    pub(crate) commands: Mutex<Vec<String>>,
    pub(crate) destroyed: Mutex<Vec<String>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            image_exists: false,
            preserves_interpreter: true,
            fail_build: false,
            fail_create: false,
            fail_ready: false,
            fail_command: false,
            fail_destroy: false,
            create_delay: Duration::ZERO,
            command_delay: Duration::ZERO,
            output: CommandOutput {
                exit_code: 0,
                stdout: "{}".into(),
                stderr: String::new(),
            },
            queries: AtomicUsize::new(0),
            built: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn with_output(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            output: CommandOutput {
                exit_code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            ..Self::default()
        }
    }

    pub fn image_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> Vec<ImageRequest> {
        self.built.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn api_key_env(&self) -> &'static str {
        "FAKE_API_KEY"
    }

    fn preserves_interpreter(&self) -> bool {
        self.preserves_interpreter
    }

    async fn image_exists(&self, _api_key: &str, _image: &str) -> ProviderResult<bool> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.image_exists)
    }

    async fn build_image(
        &self,
        _api_key: &str,
        request: &ImageRequest,
        logs: LogSink<'_>,
    ) -> ProviderResult<()> {
        logs("step 1/1");
        if self.fail_build {
            return Err(ProviderError::Build("dockerfile step failed".into()));
        }
        self.built.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn create_instance(
        &self,
        _api_key: &str,
        image: &str,
        _resources: &Resources,
        _lifetime: Duration,
    ) -> ProviderResult<Instance> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create {
            return Err(ProviderError::Http("connection refused".into()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(image.to_string());
        Ok(Instance::new(format!("sb-{}", created.len())))
    }

    async fn wait_ready(
        &self,
        _api_key: &str,
        _instance: &Instance,
        _timeout: Duration,
    ) -> ProviderResult<()> {
        if self.fail_ready {
            return Err(ProviderError::Status {
                context: "get sandbox".into(),
                status: 500,
                body: "instance failed to start".into(),
            });
        }
        Ok(())
    }

    async fn run_command(
        &self,
        _api_key: &str,
        _instance: &Instance,
        command: &str,
        _timeout: Duration,
    ) -> ProviderResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        if self.fail_command {
            return Err(ProviderError::Http("connection reset".into()));
        }
        Ok(self.output.clone())
    }

    async fn destroy_instance(&self, _api_key: &str, instance: &Instance) -> ProviderResult<()> {
        self.destroyed.lock().unwrap().push(instance.id.clone());
        if self.fail_destroy {
            return Err(ProviderError::Http("connection refused".into()));
        }
        Ok(())
    }
}
