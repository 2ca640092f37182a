use std::time::Duration;

use thiserror::Error;

use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device unreachable: {0}")]
    Transient(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Device suspended, retry in {}s", remaining.as_secs())]
    Suspended { remaining: Duration },

    #[error("Capture process error: {0}")]
    Capture(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Remote storage error: {0}")]
    Storage(String),

    #[error("Stream gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid segment transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AuthRejected(msg) => Self::AuthRejected(msg),
            SessionError::Suspended { remaining } => Self::Suspended { remaining },
            SessionError::Transient(msg) => Self::Transient(msg),
            SessionError::Internal(msg) => Self::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
