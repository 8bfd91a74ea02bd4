#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] remote::RemoteError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
