//! Error taxonomy
//!
//! Nothing here is fatal. Transport errors drive connection status, malformed
//! events are logged and dropped, duplicates and sequence gaps are not errors.

use thiserror::Error;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("topic {0} unavailable")]
    TopicUnavailable(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("subscription closed")]
    Closed,

    #[error("unknown subscription handle {0}")]
    UnknownHandle(u64),
}

/// Errors that can occur in the synchronization core
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: SyncError = TransportError::TopicUnavailable("org:o1".to_string()).into();
        assert_eq!(err.to_string(), "transport error: topic org:o1 unavailable");
    }
}
