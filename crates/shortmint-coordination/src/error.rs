use thiserror::Error;

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("connection to coordination service lost: {0}")]
    ConnectionLost(String),
    #[error("coordination session expired: {0}")]
    SessionExpired(String),
    #[error("coordination operation timed out: {0}")]
    Timeout(String),
    #[error("coordination operation failed: {0}")]
    Operation(String),
}

impl CoordinationError {
    /// Whether retrying the same call on the same session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Timeout(_))
    }
}
