use std::time::Duration;

use async_trait::async_trait;
use remote_core::Deadline;

use crate::context::BuildContext;
use crate::error::ProviderResult;

/// Receives build progress lines while an image is being built.
pub type LogSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Compute resources requested for an image or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub cpu_count: u32,
    pub memory_mb: u32,
    pub disk_gb: Option<u32>,
}

/// Everything a provider needs to build and publish an image.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub name: String,
    pub dockerfile: String,
    /// The project directory the Dockerfile's `COPY`/`ADD` steps read from.
    pub context: BuildContext,
    pub resources: Resources,
}

/// A running sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    /// Per-instance token some providers require on command requests.
    pub access_token: Option<String>,
}

impl Instance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Control plane of a sandbox vendor.
///
/// Creation and readiness are separate steps so the caller can take
/// ownership of an instance before waiting on it.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Environment variable holding the API key when the config has none.
    fn api_key_env(&self) -> &'static str;

    /// Whether commands run through an interpreter that honors the script's
    /// shebang. When false the harness is shipped base64-encoded and run
    /// with bash explicitly.
    fn preserves_interpreter(&self) -> bool;

    async fn image_exists(&self, api_key: &str, image: &str) -> ProviderResult<bool>;

    /// Build and publish `request`, returning once the image is usable.
    async fn build_image(
        &self,
        api_key: &str,
        request: &ImageRequest,
        logs: LogSink<'_>,
    ) -> ProviderResult<()>;

    /// Ask for a new instance of `image`. Returns as soon as the provider has
    /// assigned an id; the instance may not accept commands yet.
    async fn create_instance(
        &self,
        api_key: &str,
        image: &str,
        resources: &Resources,
        lifetime: Duration,
    ) -> ProviderResult<Instance>;

    async fn wait_ready(
        &self,
        api_key: &str,
        instance: &Instance,
        timeout: Duration,
    ) -> ProviderResult<()>;

    async fn run_command(
        &self,
        api_key: &str,
        instance: &Instance,
        command: &str,
        timeout: Duration,
    ) -> ProviderResult<CommandOutput>;

    /// Destroy `instance`. An instance the provider no longer knows about
    /// counts as destroyed.
    async fn destroy_instance(&self, api_key: &str, instance: &Instance) -> ProviderResult<()>;
}

/// Poll interval shared by provider readiness and build loops.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Whole seconds covering `d`, never zero.
pub(crate) fn ceil_secs(d: Duration) -> u64 {
    Deadline::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)).as_secs_ceil()
}
