use thiserror::Error;

/// A required credential or identifier is absent. Not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    Missing(&'static str),
}

/// Why the intake refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    #[error("text must not be empty")]
    EmptyText,
    #[error("relay command queue is full")]
    ChannelFull,
    #[error("relay is shutting down")]
    Closed,
}

/// Failures on the upstream synthesis connection.
///
/// These never reach intake callers; the relay worker turns them into a
/// state transition and a reconnect.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("upstream I/O error: {0}")]
    Io(String),
    #[error("upstream closed the connection")]
    Closed,
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}
