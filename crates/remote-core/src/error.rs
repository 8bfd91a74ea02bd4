#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Bad or missing credentials, build source or version. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required shell, interpreter or binary missing or too old.
    #[error("environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("{0}")]
    Timeout(String),

    #[error("remote execution exited with {}: {output}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, output: String },

    /// The result channel was unreadable or held neither a result nor a
    /// failure document.
    #[error("result channel error: {0}")]
    Channel(String),

    /// The execution environment itself failed (spawn, provider API, transport).
    #[error("remote fault: {0}")]
    RemoteFault(String),

    /// The remote program raised and reported it through the result channel.
    #[error("{error_type}: {error_message}")]
    Application {
        error_type: String,
        error_message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_display() {
        let err = RemoteError::NonZeroExit {
            code: Some(3),
            output: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote execution exited with exit code 3: boom"
        );

        let err = RemoteError::NonZeroExit {
            code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn application_display_preserves_remote_type() {
        let err = RemoteError::Application {
            error_type: "ValueError".into(),
            error_message: "bad input".into(),
        };
        assert_eq!(err.to_string(), "ValueError: bad input");
    }
}
