use remote_core::{
    ExecutionFailure, ExecutionOutcome, FailureEnvelope, FailureKind, RemoteError, Result, preview,
};
use serde::de::DeserializeOwned;

const DOCUMENT_PREVIEW_CHARS: usize = 500;

/// Turn an execution outcome into the caller's result type.
///
/// A document carrying a `true` failure marker is always an application
/// error, even when `T` would accept it (`serde_json::Value`). Anything else
/// is decoded as `T`. A program that exited non-zero after writing an
/// envelope reports the application error it carries.
pub(crate) fn decode<T: DeserializeOwned>(outcome: ExecutionOutcome) -> Result<T> {
    match outcome {
        ExecutionOutcome::Success(document) => decode_document(&document),
        ExecutionOutcome::Failure(failure) => Err(failure_error(failure)),
    }
}

fn decode_document<T: DeserializeOwned>(document: &[u8]) -> Result<T> {
    if let Some(envelope) = FailureEnvelope::parse(document) {
        return Err(application_error(envelope));
    }
    let schema_error = match serde_json::from_slice::<T>(document) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    Err(RemoteError::Channel(format!(
        "result document matched neither the expected output nor a failure envelope: \
         {schema_error}; document: {}",
        preview(document, DOCUMENT_PREVIEW_CHARS)
    )))
}

fn failure_error(failure: ExecutionFailure) -> RemoteError {
    match failure.kind {
        FailureKind::Timeout => RemoteError::Timeout(failure.message),
        FailureKind::NonZeroExit => {
            let envelope = failure.channel.as_deref().and_then(FailureEnvelope::parse);
            match envelope {
                Some(envelope) => application_error(envelope),
                None => RemoteError::NonZeroExit {
                    code: failure.exit_code,
                    output: failure.message,
                },
            }
        }
        FailureKind::ChannelError => RemoteError::Channel(failure.message),
        FailureKind::RemoteFault => RemoteError::RemoteFault(failure.message),
    }
}

fn application_error(envelope: FailureEnvelope) -> RemoteError {
    RemoteError::Application {
        error_type: envelope.error_type,
        error_message: envelope.error_message,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Resized {
        width: u32,
        height: u32,
    }

    const ENVELOPE: &[u8] =
        br#"{"__remote_execution_error__": true, "error_type": "ValueError", "error_message": "bad size"}"#;

    #[test]
    fn success_document_decodes_into_output() {
        let outcome = ExecutionOutcome::Success(br#"{"width": 4, "height": 3}"#.to_vec());
        assert_eq!(
            decode::<Resized>(outcome).unwrap(),
            Resized {
                width: 4,
                height: 3
            }
        );
    }

    #[test]
    fn envelope_on_clean_exit_is_application_error() {
        let err = decode::<Resized>(ExecutionOutcome::Success(ENVELOPE.to_vec())).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: bad size");
    }

    #[test]
    fn envelope_wins_over_untyped_output() {
        let err =
            decode::<serde_json::Value>(ExecutionOutcome::Success(ENVELOPE.to_vec())).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Application { ref error_message, .. } if error_message == "bad size"
        ));
    }

    #[test]
    fn false_marker_decodes_as_plain_value() {
        let doc = br#"{"__remote_execution_error__": false, "error_type": "E", "error_message": "m"}"#;
        let value = decode::<serde_json::Value>(ExecutionOutcome::Success(doc.to_vec())).unwrap();
        assert_eq!(value["error_type"], "E");
    }

    #[test]
    fn envelope_after_non_zero_exit_is_application_error() {
        let outcome = ExecutionOutcome::non_zero_exit(Some(1), "Traceback", Some(ENVELOPE.to_vec()));
        let err = decode::<Resized>(outcome).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Application { ref error_type, .. } if error_type == "ValueError"
        ));
    }

    #[test]
    fn non_zero_exit_without_envelope_keeps_exit_code() {
        let outcome = ExecutionOutcome::non_zero_exit(Some(2), "killed", Some(b"garbage".to_vec()));
        let err = decode::<Resized>(outcome).unwrap_err();
        assert!(matches!(err, RemoteError::NonZeroExit { code: Some(2), .. }));
    }

    #[test]
    fn unrecognized_document_is_channel_error() {
        let outcome = ExecutionOutcome::Success(br#"{"width": "wide"}"#.to_vec());
        let err = decode::<Resized>(outcome).unwrap_err();
        assert!(matches!(err, RemoteError::Channel(ref m) if m.contains("wide")));
    }

    #[test]
    fn failure_kinds_map_to_errors() {
        assert!(matches!(
            decode::<Resized>(ExecutionOutcome::timeout("late")),
            Err(RemoteError::Timeout(_))
        ));
        assert!(matches!(
            decode::<Resized>(ExecutionOutcome::channel_error("empty")),
            Err(RemoteError::Channel(_))
        ));
        assert!(matches!(
            decode::<Resized>(ExecutionOutcome::remote_fault("spawn")),
            Err(RemoteError::RemoteFault(_))
        ));
    }
}
