/// Errors raised while decoding or encoding wire envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
}

impl ProtocolError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
