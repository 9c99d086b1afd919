/// Failure to decode an inbound message.
///
/// Every variant is fatal for the session that sent the message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("envelope has no string `action` field")]
    MissingAction,
    #[error("invalid `{action}` payload: {message}")]
    Payload { action: String, message: String },
}

impl DecodeError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotAnObject => "not_an_object",
            Self::MissingAction => "missing_action",
            Self::Payload { .. } => "invalid_payload",
        }
    }
}
