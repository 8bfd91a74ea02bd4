use remote_core::RemoteError;

/// Failure talking to a sandbox provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),

    #[error("{context} returned {status}: {body}")]
    Status {
        context: String,
        status: u16,
        body: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("build context: {0}")]
    Context(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<ProviderError> for RemoteError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Timeout(msg) => RemoteError::Timeout(msg),
            ProviderError::Status {
                status: 401 | 403,
                ..
            } => RemoteError::Configuration(format!("provider rejected credentials: {e}")),
            other => RemoteError::RemoteFault(other.to_string()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
