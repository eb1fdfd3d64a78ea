//! Hash error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, HashError>;

/// Errors from hash parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Hash string has the wrong length
    #[error("hash string must be 64 characters, got {0}")]
    InvalidLength(usize),

    /// Hash string contains a non-hex character
    #[error("invalid hex in hash string: {0:?}")]
    InvalidHex(String),
}
