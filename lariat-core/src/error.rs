//! Error types for Lariat operations

/// Result type for Lariat operations
pub type Result<T> = std::result::Result<T, LariatError>;

/// Error types for the Lariat collector
#[derive(Debug, thiserror::Error)]
pub enum LariatError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend answered a batch or identity request with a failure status
    #[error("Dispatch failed with status {status}: {body}")]
    Dispatch {
        /// HTTP status code
        status: u16,
        /// Response body (best effort)
        body: String,
    },

    /// Transport-level failure talking to the backend
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Session not tracked by the manager
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session timeout callback failed
    #[error("Timeout callback failed for session {session_id}: {message}")]
    Callback {
        /// Session whose callback failed
        session_id: String,
        /// Failure description
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LariatError {
    /// Whether a dispatch attempt that failed with this error may be retried
    pub fn is_transient(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            LariatError::Dispatch { status, .. } => retryable_statuses.contains(status),
            LariatError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<String> for LariatError {
    fn from(s: String) -> Self {
        LariatError::Other(s)
    }
}

impl From<&str> for LariatError {
    fn from(s: &str) -> Self {
        LariatError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for LariatError {
    fn from(err: anyhow::Error) -> Self {
        LariatError::Other(err.to_string())
    }
}

impl From<figment::Error> for LariatError {
    fn from(err: figment::Error) -> Self {
        LariatError::Configuration(err.to_string())
    }
}
