use shared_types::SseDecodeError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] SseDecodeError),
    #[error("{0}")]
    Remote(String),
    #[error("event handler failed: {0}")]
    Handler(#[source] anyhow::Error),
    #[error("completed without returning result")]
    MissingResult,
    #[error("HTTP error: {status} ({message})")]
    Http { status: u16, message: String },
}

impl ClientError {
    /// HTTP status for errors the server answered with.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
