use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("request to {origin} throttled")]
    Throttled { origin: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    /// Everything except a malformed URL may succeed on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NetworkError::InvalidUrl(_))
    }
}
