use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("not subscribed")]
    NotSubscribed,
    #[error("document mismatch: connected to {expected}, got {got}")]
    DocumentMismatch { expected: String, got: String },
    #[error("access denied")]
    AccessDenied,
    #[error("document not found")]
    NotFound,
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::UnknownType(_) | SessionError::NotSubscribed
        )
    }

    /// Whether an error frame can still be sent to the client.
    pub fn reportable(&self) -> bool {
        !matches!(self, SessionError::Transport(_))
    }
}
