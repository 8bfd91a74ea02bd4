use serde::{Deserialize, Serialize};

/// Marker key identifying a failure document on the result channel.
pub const ERROR_MARKER: &str = "__remote_execution_error__";

/// Failure document an entrypoint writes when its target raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEnvelope {
    #[serde(rename = "__remote_execution_error__")]
    marker: bool,
    pub error_type: String,
    pub error_message: String,
}

impl FailureEnvelope {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            marker: true,
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing three plain fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a channel document. Returns `None` unless the marker is present
    /// and `true`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(bytes)
            .ok()
            .filter(|envelope| envelope.marker)
    }
}
