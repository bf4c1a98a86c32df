use std::time::Duration;

/// Errors that can occur during station link operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-level error (bad address, undecodable line, etc.).
    #[error("protocol error: {0}")]
    Protocol(#[from] rdzlink_rs_protocol::ProtocolError),

    /// Operation exceeded the configured timeout duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A received line exceeded the configured maximum length.
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),

    /// Station closed the connection (read returned 0 bytes).
    #[error("disconnected")]
    Disconnected,

    /// The service discovery backend failed.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// The component's task has exited; the command was not delivered.
    #[error("{0} is no longer running")]
    Closed(&'static str),
}

/// Convenience alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;
