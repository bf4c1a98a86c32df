#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid port in {address:?}: {reason}")]
    InvalidPort { address: String, reason: String },

    #[error("invalid discovery mode: {0}")]
    InvalidMode(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
