use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),
}

/// Failures of the session core.
///
/// `InvalidAddress`, `InvalidJid` and `NotJoined` are returned to callers.
/// `Stanza`, `LivenessTimeout` and `CorrelationMismatch` are only logged and
/// published; they never change session state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("transport failed to connect: {0}")]
    TransportConnect(String),

    #[error("stanza error {condition}{}", text.as_deref().map(|t| format!(": {t}")).unwrap_or_default())]
    Stanza {
        condition: String,
        text: Option<String>,
    },

    #[error("liveness probe {id} timed out")]
    LivenessTimeout { id: String },

    #[error("no pending request matches response id {id}")]
    CorrelationMismatch { id: String },

    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error("not joined to a room")]
    NotJoined,

    #[error("session task has stopped")]
    Closed,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stanza_error_display_includes_optional_text() {
        let bare = SessionError::Stanza {
            condition: "item-not-found".to_string(),
            text: None,
        };
        assert_eq!(bare.to_string(), "stanza error item-not-found");

        let with_text = SessionError::Stanza {
            condition: "not-authorized".to_string(),
            text: Some("password required".to_string()),
        };
        assert_eq!(
            with_text.to_string(),
            "stanza error not-authorized: password required"
        );
    }
}
