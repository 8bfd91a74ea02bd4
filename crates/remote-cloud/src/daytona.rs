//! Daytona control plane: snapshots, sandboxes and the toolbox process API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::http::{Auth, HttpClient, send, send_json};
use crate::provider::{
    CommandOutput, ImageRequest, Instance, LogSink, POLL_INTERVAL, Provider, Resources, ceil_secs,
};

const API_URL: &str = "https://app.daytona.io/api";

pub struct DaytonaProvider {
    http: HttpClient,
}

impl DaytonaProvider {
    pub fn new() -> ProviderResult<Self> {
        Self::with_url(API_URL)
    }

    pub fn with_url(api_url: &str) -> ProviderResult<Self> {
        Ok(Self {
            http: HttpClient::new(api_url, Auth::Bearer)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    state: String,
    #[serde(default)]
    error_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sandbox {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    exit_code: i32,
    #[serde(default)]
    result: String,
}

/// Daytona sizes memory in whole gigabytes.
fn memory_gb(resources: &Resources) -> u32 {
    resources.memory_mb.div_ceil(1024).max(1)
}

/// Idle minutes before Daytona stops a sandbox on its own. Zero disables
/// auto-stop, so the floor is one minute.
fn auto_stop_minutes(lifetime: Duration) -> u64 {
    ceil_secs(lifetime).div_ceil(60).max(1)
}

impl DaytonaProvider {
    /// Push the build context to object storage under its hash. A conflict
    /// means an identical archive is already stored.
    async fn upload_context(&self, api_key: &str, request: &ImageRequest) -> ProviderResult<()> {
        let path = format!("/object-storage/context/{}", request.context.hash);
        let upload = send(
            self.http
                .request(Method::PUT, &path, api_key)
                .header("Content-Type", "application/gzip")
                .body(request.context.archive.clone()),
            "upload build context",
        )
        .await;
        match upload {
            Ok(_) => {
                debug!(hash = %request.context.hash, "build context uploaded");
                Ok(())
            }
            Err(ProviderError::Status { status: 409, .. }) => {
                debug!(hash = %request.context.hash, "build context already stored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Provider for DaytonaProvider {
    fn name(&self) -> &'static str {
        "daytona"
    }

    fn api_key_env(&self) -> &'static str {
        "DAYTONA_API_KEY"
    }

    /// Toolbox commands run through `sh`.
    fn preserves_interpreter(&self) -> bool {
        false
    }

    async fn image_exists(&self, api_key: &str, image: &str) -> ProviderResult<bool> {
        let path = format!("/snapshots/{image}");
        match send(self.http.request(Method::GET, &path, api_key), "get snapshot").await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn build_image(
        &self,
        api_key: &str,
        request: &ImageRequest,
        logs: LogSink<'_>,
    ) -> ProviderResult<()> {
        self.upload_context(api_key, request).await?;
        send(
            self.http
                .request(Method::POST, "/snapshots", api_key)
                .json(&serde_json::json!({
                    "name": request.name,
                    "buildInfo": {
                        "dockerfileContent": request.dockerfile,
                        "contextHashes": [request.context.hash],
                    },
                    "cpu": request.resources.cpu_count,
                    "memory": memory_gb(&request.resources),
                    "disk": request.resources.disk_gb,
                })),
            "create snapshot",
        )
        .await?;

        let path = format!("/snapshots/{}", request.name);
        let mut last_state = String::new();
        loop {
            let snapshot: Snapshot = send_json(
                self.http.request(Method::GET, &path, api_key),
                "get snapshot",
            )
            .await?;

            if snapshot.state != last_state {
                logs(&format!("snapshot {} is {}", request.name, snapshot.state));
                last_state.clone_from(&snapshot.state);
            }

            match snapshot.state.as_str() {
                "active" => return Ok(()),
                "error" | "build_failed" => {
                    let reason = snapshot
                        .error_reason
                        .unwrap_or_else(|| "no reason given".into());
                    return Err(ProviderError::Build(format!("{}: {reason}", request.name)));
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn create_instance(
        &self,
        api_key: &str,
        image: &str,
        _resources: &Resources,
        lifetime: Duration,
    ) -> ProviderResult<Instance> {
        let sandbox: Sandbox = send_json(
            self.http
                .request(Method::POST, "/sandbox", api_key)
                .timeout(lifetime)
                // A sandbox whose create response never reaches us still
                // stops and deletes itself once the call's lifetime is up.
                .json(&serde_json::json!({
                    "snapshot": image,
                    "autoStopInterval": auto_stop_minutes(lifetime),
                    "autoDeleteInterval": 0,
                })),
            "create sandbox",
        )
        .await?;
        debug!(sandbox = %sandbox.id, state = ?sandbox.state, "sandbox requested");
        Ok(Instance::new(sandbox.id))
    }

    async fn wait_ready(
        &self,
        api_key: &str,
        instance: &Instance,
        timeout: Duration,
    ) -> ProviderResult<()> {
        let path = format!("/sandbox/{}", instance.id);
        let poll = async {
            loop {
                let sandbox: Sandbox = send_json(
                    self.http.request(Method::GET, &path, api_key),
                    "get sandbox",
                )
                .await?;
                match sandbox.state.as_deref() {
                    Some("started") => return Ok::<(), ProviderError>(()),
                    Some("error" | "build_failed") => {
                        let reason = sandbox
                            .error_reason
                            .unwrap_or_else(|| "no reason given".into());
                        return Err(ProviderError::Http(format!(
                            "sandbox {} failed to start: {reason}",
                            instance.id
                        )));
                    }
                    _ => tokio::time::sleep(POLL_INTERVAL).await,
                }
            }
        };
        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            ProviderError::Timeout(format!("sandbox {} not started after {timeout:?}", instance.id))
        })?
    }

    async fn run_command(
        &self,
        api_key: &str,
        instance: &Instance,
        command: &str,
        timeout: Duration,
    ) -> ProviderResult<CommandOutput> {
        let path = format!("/toolbox/{}/toolbox/process/execute", instance.id);
        let secs = ceil_secs(timeout);
        let response: ExecuteResponse = send_json(
            self.http
                .request(Method::POST, &path, api_key)
                .timeout(timeout)
                .json(&serde_json::json!({
                    "command": command,
                    "timeout": secs,
                })),
            "execute command",
        )
        .await?;

        // The toolbox merges the process's streams into one result.
        Ok(CommandOutput {
            exit_code: response.exit_code,
            stdout: response.result,
            stderr: String::new(),
        })
    }

    async fn destroy_instance(&self, api_key: &str, instance: &Instance) -> ProviderResult<()> {
        let path = format!("/sandbox/{}?force=true", instance.id);
        match send(self.http.request(Method::DELETE, &path, api_key), "delete sandbox").await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::context::BuildContext;

    fn context() -> BuildContext {
        BuildContext::from_archive(b"archive bytes".to_vec())
    }

    fn resources() -> Resources {
        Resources {
            cpu_count: 1,
            memory_mb: 1024,
            disk_gb: Some(3),
        }
    }

    #[test]
    fn memory_rounds_up_to_whole_gigabytes() {
        let mut r = resources();
        assert_eq!(memory_gb(&r), 1);
        r.memory_mb = 1536;
        assert_eq!(memory_gb(&r), 2);
        r.memory_mb = 0;
        assert_eq!(memory_gb(&r), 1);
    }

    #[tokio::test]
    async fn missing_snapshot_is_reported_absent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/snapshots/worker-v1")
                    .header("authorization", "Bearer k");
                then.status(200)
                    .json_body(serde_json::json!({"name": "worker-v1", "state": "active"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/snapshots/worker-v2");
                then.status(404).body("not found");
            })
            .await;

        let provider = DaytonaProvider::with_url(&server.base_url()).unwrap();
        assert!(provider.image_exists("k", "worker-v1").await.unwrap());
        assert!(!provider.image_exists("k", "worker-v2").await.unwrap());
    }

    #[test]
    fn auto_stop_covers_the_lifetime() {
        assert_eq!(auto_stop_minutes(Duration::from_millis(100)), 1);
        assert_eq!(auto_stop_minutes(Duration::from_secs(60)), 1);
        assert_eq!(auto_stop_minutes(Duration::from_secs(61)), 2);
    }

    #[tokio::test]
    async fn build_uploads_context_then_waits_for_active() {
        let server = MockServer::start_async().await;
        let upload = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(format!("/object-storage/context/{}", context().hash))
                    .header("authorization", "Bearer k")
                    .body("archive bytes");
                then.status(200);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/snapshots").json_body_partial(format!(
                    r#"{{"name": "worker-v1", "cpu": 1, "memory": 1, "disk": 3,
                        "buildInfo": {{"dockerfileContent": "FROM ubuntu\n",
                                       "contextHashes": ["{}"]}}}}"#,
                    context().hash
                ));
                then.status(200)
                    .json_body(serde_json::json!({"name": "worker-v1", "state": "pending"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/snapshots/worker-v1");
                then.status(200)
                    .json_body(serde_json::json!({"name": "worker-v1", "state": "active"}));
            })
            .await;

        let provider = DaytonaProvider::with_url(&server.base_url()).unwrap();
        let request = ImageRequest {
            name: "worker-v1".into(),
            dockerfile: "FROM ubuntu\n".into(),
            context: context(),
            resources: resources(),
        };
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().unwrap().push(line.to_string());
        provider.build_image("k", &request, &sink).await.unwrap();

        upload.assert_async().await;
        create.assert_async().await;
        assert_eq!(*seen.lock().unwrap(), vec!["snapshot worker-v1 is active"]);
    }

    #[tokio::test]
    async fn failed_build_is_build_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path_contains("/object-storage/context/");
                then.status(409).body("already exists");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/snapshots");
                then.status(200).json_body(serde_json::json!({"state": "pending"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/snapshots/worker-v1");
                then.status(200).json_body(serde_json::json!({
                    "state": "build_failed",
                    "errorReason": "base image not found",
                }));
            })
            .await;

        let provider = DaytonaProvider::with_url(&server.base_url()).unwrap();
        let request = ImageRequest {
            name: "worker-v1".into(),
            dockerfile: "FROM missing\n".into(),
            context: context(),
            resources: resources(),
        };
        let err = provider
            .build_image("k", &request, &|_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Build(ref m) if m.contains("base image not found")));
    }

    #[tokio::test]
    async fn sandbox_lifecycle() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/sandbox")
                    .json_body(serde_json::json!({
                        "snapshot": "worker-v1",
                        "autoStopInterval": 1,
                        "autoDeleteInterval": 0,
                    }));
                then.status(200)
                    .json_body(serde_json::json!({"id": "sb-9", "state": "creating"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sandbox/sb-9");
                then.status(200)
                    .json_body(serde_json::json!({"id": "sb-9", "state": "started"}));
            })
            .await;
        let exec = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/toolbox/sb-9/toolbox/process/execute")
                    .json_body(serde_json::json!({"command": "bash run.sh", "timeout": 2}));
                then.status(200)
                    .json_body(serde_json::json!({"exitCode": 0, "result": "{\"ok\":true}"}));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/sandbox/sb-9")
                    .query_param("force", "true");
                then.status(200);
            })
            .await;

        let provider = DaytonaProvider::with_url(&server.base_url()).unwrap();
        let instance = provider
            .create_instance("k", "worker-v1", &resources(), Duration::from_secs(10))
            .await
            .unwrap();
        provider
            .wait_ready("k", &instance, Duration::from_secs(5))
            .await
            .unwrap();
        let output = provider
            .run_command("k", &instance, "bash run.sh", Duration::from_millis(1_500))
            .await
            .unwrap();
        provider.destroy_instance("k", &instance).await.unwrap();

        exec.assert_async().await;
        delete.assert_async().await;
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn errored_sandbox_fails_readiness() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sandbox/sb-1");
                then.status(200).json_body(serde_json::json!({
                    "id": "sb-1",
                    "state": "error",
                    "errorReason": "no capacity",
                }));
            })
            .await;

        let provider = DaytonaProvider::with_url(&server.base_url()).unwrap();
        let err = provider
            .wait_ready("k", &Instance::new("sb-1"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no capacity"));
    }
}
