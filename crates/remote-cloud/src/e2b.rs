//! E2B control plane: templates addressed by alias, sandboxes, and the
//! in-sandbox process service.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::http::{Auth, HttpClient, send, send_json};
use crate::provider::{
    CommandOutput, ImageRequest, Instance, LogSink, POLL_INTERVAL, Provider, Resources, ceil_secs,
};

const API_URL: &str = "https://api.e2b.dev";
const SANDBOX_DOMAIN: &str = "e2b.app";
const ENVD_PORT: u16 = 49983;
const START_CMD: &str = "echo ready";

/// Connect protocol envelope flag marking the end-of-stream message.
const END_STREAM_FLAG: u8 = 0x02;

pub struct E2bProvider {
    http: HttpClient,
    /// Overrides the per-sandbox process service URL.
    envd_url: Option<String>,
}

impl E2bProvider {
    pub fn new() -> ProviderResult<Self> {
        Self::with_endpoints(API_URL, None)
    }

    pub fn with_endpoints(api_url: &str, envd_url: Option<String>) -> ProviderResult<Self> {
        Ok(Self {
            http: HttpClient::new(api_url, Auth::Header("X-API-Key"))?,
            envd_url,
        })
    }

    fn envd_url(&self, instance: &Instance) -> String {
        match &self.envd_url {
            Some(url) => url.clone(),
            None => format!("https://{ENVD_PORT}-{}.{SANDBOX_DOMAIN}", instance.id),
        }
    }

    /// Upload the build context unless the template already has an archive
    /// with the same hash.
    async fn upload_context(
        &self,
        api_key: &str,
        template_id: &str,
        request: &ImageRequest,
    ) -> ProviderResult<()> {
        let path = format!("/templates/{template_id}/files/{}", request.context.hash);
        let upload: ContextUpload = send_json(
            self.http.request(Method::GET, &path, api_key),
            "get context upload link",
        )
        .await?;
        if upload.present {
            debug!(hash = %request.context.hash, "build context already uploaded");
            return Ok(());
        }
        let url = upload.url.ok_or_else(|| {
            ProviderError::Decode("context upload link missing from response".into())
        })?;
        send(
            self.http
                .request_url(Method::PUT, &url)
                .header("Content-Type", "application/gzip")
                .body(request.context.archive.clone()),
            "upload build context",
        )
        .await?;
        debug!(
            hash = %request.context.hash,
            bytes = request.context.archive.len(),
            "build context uploaded"
        );
        Ok(())
    }
}

#[derive(Deserialize)]
struct TemplateSummary {
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Deserialize)]
struct TemplateCreated {
    #[serde(rename = "templateID")]
    template_id: String,
    #[serde(rename = "buildID")]
    build_id: String,
}

#[derive(Deserialize)]
struct ContextUpload {
    present: bool,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct BuildStatus {
    status: String,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    reason: Option<BuildReason>,
}

#[derive(Deserialize)]
struct BuildReason {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxCreated {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

#[derive(Deserialize)]
struct SandboxDetail {
    state: String,
}

#[derive(Deserialize)]
struct ProcessMessage {
    #[serde(default)]
    event: Option<ProcessEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEvent {
    #[serde(default)]
    data: Option<ProcessData>,
    #[serde(default)]
    end: Option<ProcessEnd>,
}

#[derive(Deserialize)]
struct ProcessData {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEnd {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct EndOfStream {
    #[serde(default)]
    error: Option<ConnectError>,
}

#[derive(Deserialize)]
struct ConnectError {
    code: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl Provider for E2bProvider {
    fn name(&self) -> &'static str {
        "e2b"
    }

    fn api_key_env(&self) -> &'static str {
        "E2B_API_KEY"
    }

    fn preserves_interpreter(&self) -> bool {
        true
    }

    async fn image_exists(&self, api_key: &str, image: &str) -> ProviderResult<bool> {
        let templates: Vec<TemplateSummary> = send_json(
            self.http.request(Method::GET, "/templates", api_key),
            "list templates",
        )
        .await?;
        Ok(templates
            .iter()
            .any(|t| t.aliases.iter().any(|alias| alias == image)))
    }

    async fn build_image(
        &self,
        api_key: &str,
        request: &ImageRequest,
        logs: LogSink<'_>,
    ) -> ProviderResult<()> {
        let created: TemplateCreated = send_json(
            self.http
                .request(Method::POST, "/v2/templates", api_key)
                .json(&serde_json::json!({
                    "alias": request.name,
                    "cpuCount": request.resources.cpu_count,
                    "memoryMB": request.resources.memory_mb,
                })),
            "create template",
        )
        .await?;
        debug!(template = %created.template_id, build = %created.build_id, "template registered");

        self.upload_context(api_key, &created.template_id, request)
            .await?;

        let build_path = format!(
            "/v2/templates/{}/builds/{}",
            created.template_id, created.build_id
        );
        send(
            self.http
                .request(Method::POST, &build_path, api_key)
                .json(&serde_json::json!({
                    "dockerfile": request.dockerfile,
                    "filesHash": request.context.hash,
                    "startCmd": START_CMD,
                })),
            "start template build",
        )
        .await?;

        let mut offset = 0usize;
        loop {
            let status_path = format!(
                "/templates/{}/builds/{}/status?logsOffset={offset}",
                created.template_id, created.build_id
            );
            let status: BuildStatus = send_json(
                self.http.request(Method::GET, &status_path, api_key),
                "template build status",
            )
            .await?;

            offset += status.logs.len();
            for line in &status.logs {
                logs(line);
            }

            match status.status.as_str() {
                "ready" => return Ok(()),
                "error" => {
                    let reason = status
                        .reason
                        .map(|r| r.message)
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
        let created: SandboxCreated = send_json(
            self.http
                .request(Method::POST, "/sandboxes", api_key)
                .json(&serde_json::json!({
                    "templateID": image,
                    "timeout": ceil_secs(lifetime),
                })),
            "create sandbox",
        )
        .await?;
        Ok(Instance {
            id: created.sandbox_id,
            access_token: created.envd_access_token,
        })
    }

    async fn wait_ready(
        &self,
        api_key: &str,
        instance: &Instance,
        timeout: Duration,
    ) -> ProviderResult<()> {
        let path = format!("/sandboxes/{}", instance.id);
        let poll = async {
            loop {
                let detail: SandboxDetail = send_json(
                    self.http.request(Method::GET, &path, api_key),
                    "get sandbox",
                )
                .await?;
                if detail.state == "running" {
                    return Ok::<(), ProviderError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            ProviderError::Timeout(format!("sandbox {} not running after {timeout:?}", instance.id))
        })?
    }

    async fn run_command(
        &self,
        _api_key: &str,
        instance: &Instance,
        command: &str,
        timeout: Duration,
    ) -> ProviderResult<CommandOutput> {
        let url = format!("{}/process.Process/Start", self.envd_url(instance));
        let message = serde_json::to_vec(&serde_json::json!({
            "process": {
                "cmd": "/bin/bash",
                "args": ["-l", "-c", command],
                "envs": {},
            }
        }))
        .map_err(|e| ProviderError::Decode(format!("encode process request: {e}")))?;

        let mut req = self
            .http
            .request_url(Method::POST, &url)
            .header("Content-Type", "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            // The process service authenticates the sandbox user as root.
            .basic_auth("root", Some(""))
            .timeout(timeout)
            .body(envelope(0, &message));
        if let Some(token) = &instance.access_token {
            req = req.header("X-Access-Token", token);
        }

        let body = send(req, "start process")
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::Http(format!("read process stream: {e}")))?;
        parse_process_stream(&body)
    }

    async fn destroy_instance(&self, api_key: &str, instance: &Instance) -> ProviderResult<()> {
        let path = format!("/sandboxes/{}", instance.id);
        match send(self.http.request(Method::DELETE, &path, api_key), "kill sandbox").await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Frame `message` as one Connect streaming envelope.
fn envelope(flags: u8, message: &[u8]) -> Vec<u8> {
    let len = u32::try_from(message.len()).unwrap_or(u32::MAX);
    let mut frame = Vec::with_capacity(message.len() + 5);
    frame.push(flags);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(message);
    frame
}

/// Fold a Connect server stream of process events into the command output.
fn parse_process_stream(mut body: &[u8]) -> ProviderResult<CommandOutput> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while !body.is_empty() {
        let (flags, message, rest) = split_envelope(body)?;
        body = rest;

        if flags & END_STREAM_FLAG != 0 {
            let end: EndOfStream = decode(message)?;
            if let Some(error) = end.error {
                return Err(ProviderError::Http(format!(
                    "process stream failed ({}): {}",
                    error.code, error.message
                )));
            }
            break;
        }

        let Some(event) = decode::<ProcessMessage>(message)?.event else {
            continue;
        };
        if let Some(data) = event.data {
            if let Some(chunk) = data.stdout {
                stdout.extend(decode_chunk(&chunk)?);
            }
            if let Some(chunk) = data.stderr {
                stderr.extend(decode_chunk(&chunk)?);
            }
        }
        if let Some(end) = event.end {
            if let Some(error) = end.error {
                stderr.extend_from_slice(error.as_bytes());
            }
            exit_code = Some(end.exit_code);
        }
    }

    let exit_code = exit_code
        .ok_or_else(|| ProviderError::Decode("process stream ended without an exit event".into()))?;
    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn split_envelope(body: &[u8]) -> ProviderResult<(u8, &[u8], &[u8])> {
    let truncated = || ProviderError::Decode("truncated process stream envelope".into());
    let (&flags, rest) = body.split_first().ok_or_else(truncated)?;
    let (len, rest) = rest.split_at_checked(4).ok_or_else(truncated)?;
    let len: [u8; 4] = len.try_into().map_err(|_| truncated())?;
    let len = usize::try_from(u32::from_be_bytes(len)).map_err(|_| truncated())?;
    let (message, rest) = rest.split_at_checked(len).ok_or_else(truncated)?;
    Ok((flags, message, rest))
}

fn decode<T: for<'de> Deserialize<'de>>(message: &[u8]) -> ProviderResult<T> {
    serde_json::from_slice(message)
        .map_err(|e| ProviderError::Decode(format!("process stream message: {e}")))
}

fn decode_chunk(chunk: &str) -> ProviderResult<Vec<u8>> {
    STANDARD
        .decode(chunk)
        .map_err(|e| ProviderError::Decode(format!("process output chunk: {e}")))
}
