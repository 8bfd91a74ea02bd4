/// Why an execution did not produce a result document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NonZeroExit,
    ChannelError,
    RemoteFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::NonZeroExit => f.write_str("non-zero exit"),
            Self::ChannelError => f.write_str("channel error"),
            Self::RemoteFault => f.write_str("remote fault"),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: Option<i32>,
    /// Whatever the result channel held when the program failed. A program
    /// that raised still reports its failure document here.
    pub channel: Option<Vec<u8>>,
}

/// The single result of one `execute` call.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Raw result channel contents after a clean exit.
    Success(Vec<u8>),
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Timeout, message)
    }

    pub fn non_zero_exit(
        exit_code: Option<i32>,
        message: impl Into<String>,
        channel: Option<Vec<u8>>,
    ) -> Self {
        Self::Failure(ExecutionFailure {
            kind: FailureKind::NonZeroExit,
            message: message.into(),
            exit_code,
            channel: channel.filter(|c| !c.is_empty()),
        })
    }

    pub fn channel_error(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::ChannelError, message)
    }

    pub fn remote_fault(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::RemoteFault, message)
    }

    fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(ExecutionFailure {
            kind,
            message: message.into(),
            exit_code: None,
            channel: None,
        })
    }

    /// `None` on success.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f.kind),
        }
    }
}

/// Truncate captured output for inclusion in an error message.
pub fn preview(bytes: &[u8], max_chars: usize) -> String {
    String::from_utf8_lossy(bytes).chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channel_is_dropped_from_non_zero_exit() {
        let outcome = ExecutionOutcome::non_zero_exit(Some(1), "stderr", Some(Vec::new()));
        let ExecutionOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert!(failure.channel.is_none());
    }

    #[test]
    fn failure_kind_reports_variant() {
        assert_eq!(ExecutionOutcome::Success(b"{}".to_vec()).failure_kind(), None);
        assert_eq!(
            ExecutionOutcome::timeout("late").failure_kind(),
            Some(FailureKind::Timeout)
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "héllo wörld".as_bytes();
        assert_eq!(preview(text, 4), "héll");
        assert_eq!(preview(b"abc", 500), "abc");
    }
}
