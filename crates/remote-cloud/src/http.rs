use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Default timeout for control-plane requests. Command execution requests
/// override it with the invocation deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How a provider expects the API key on each request.
#[derive(Debug, Clone, Copy)]
pub enum Auth {
    Bearer,
    Header(&'static str),
}

/// Shared HTTP client for a provider API. Owns the connection pool, base URL
/// and auth scheme. Clone is a cheap Arc refcount bump.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, auth: Auth) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Http(format!("http client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "http client initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                auth,
            }),
        })
    }

    /// Build an authenticated request. `path` is appended to the base URL
    /// (e.g. `/sandboxes`); absolute URLs are used as-is.
    pub fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.inner.base_url)
        };
        let req = self.inner.client.request(method, url);
        match self.inner.auth {
            Auth::Bearer => req.bearer_auth(api_key),
            Auth::Header(name) => req.header(name, api_key),
        }
    }

    /// Request to a URL outside the API, without the API key.
    pub fn request_url(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.inner.client.request(method, url)
    }
}

/// Send `req`, failing on transport errors and non-2xx statuses.
pub async fn send(req: reqwest::RequestBuilder, context: &str) -> ProviderResult<Response> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(format!("{context}: {e}"))
        } else {
            ProviderError::Http(format!("{context}: {e}"))
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            context: context.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// [`send`] and decode the JSON body.
pub async fn send_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
    context: &str,
) -> ProviderResult<T> {
    send(req, context)
        .await?
        .json()
        .await
        .map_err(|e| ProviderError::Decode(format!("{context}: {e}")))
}
