use thiserror::Error;

/// Errors produced by the zenlog core.
#[derive(Debug, Error)]
pub enum ZenlogError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No reply matched within the receive bound.
    #[error("timed out waiting for the logger")]
    Timeout,

    #[error("not in zenlog")]
    NotInSession,

    #[error("logger is not running: {0}")]
    LoggerUnavailable(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ZenlogError {
    fn from(e: serde_json::Error) -> Self {
        ZenlogError::Codec(e.to_string())
    }
}

pub type ZenlogResult<T> = Result<T, ZenlogError>;
