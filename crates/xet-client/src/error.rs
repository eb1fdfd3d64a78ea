//! Client error types

use thiserror::Error;
use xet_hash::XetHash;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The server answered with a non-success status
    #[error("remote returned {status} for {url}")]
    Remote { status: u16, url: String },

    /// The request exceeded the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Malformed xorb or shard bytes from the server
    #[error(transparent)]
    Format(#[from] xet_format::FormatError),

    /// Malformed hash string
    #[error(transparent)]
    Hash(#[from] xet_hash::HashError),

    /// A recomputed hash disagrees with the declared one
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: XetHash, computed: XetHash },

    /// The server response violated the API contract
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A session invariant was violated
    #[error("internal session error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else {
            ClientError::Http(err)
        }
    }
}
