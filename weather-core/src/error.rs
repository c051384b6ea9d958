//! Error types shared across the sync engine.

use thiserror::Error;

/// Why a fetch for a snapshot did not produce one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    /// The request URL carries the API key in its query, so it is stripped
    /// before the error text is kept.
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Failure of the underlying key-value storage. Never shown to the user.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync controller must be created inside a tokio runtime")]
    NoRuntime,
}
