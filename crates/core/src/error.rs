//! Error types for the core library.

use crate::chat::types::ChatMessage;
use thiserror::Error;

/// Main error type for the core library.
#[derive(Error, Debug)]
pub enum Error {
    /// Draft rejected before any work was done (caller error).
    #[error("invalid message: {0}")]
    Validation(String),

    /// Network error talking to a remote collaborator
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its time budget
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Remote store rejected or failed an operation
    #[error("remote store error: {0}")]
    Remote(String),

    /// Remote store already holds a record with this id
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Local durable storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Response generator error
    #[error("generator error: {0}")]
    Generator(String),

    /// Image upload error
    #[error("upload error: {0}")]
    Upload(String),

    /// Every send attempt failed; the message was queued for a later drain.
    #[error("failed to send message {} after {attempts} attempts: {source}", message.id())]
    SendFailed {
        /// The message as persisted in the queue (status `failed`).
        message: Box<ChatMessage>,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Remote(_) | Error::Upload(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Network(format!("request timed out: {}", err))
        } else {
            Error::Network(err.to_string())
        }
    }
}
