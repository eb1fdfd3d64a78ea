//! Container format error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors from the xorb/shard codecs
#[derive(Error, Debug)]
pub enum FormatError {
    /// A record would read past the end of the buffer
    #[error("truncated input at offset {offset}: {needed} more bytes required")]
    Truncated { offset: usize, needed: usize },

    /// The shard header tag did not match
    #[error("bad shard magic")]
    BadMagic,

    /// Unknown format version
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u64),

    /// A xorb builder or serializer exceeded the container limits
    #[error("xorb limit exceeded: {0}")]
    OversizeXorb(String),

    /// Unknown compression scheme byte in a chunk header
    #[error("unknown compression scheme {0}")]
    InvalidCompression(u8),

    /// Decompressed payload length disagrees with the chunk header
    #[error("decompressed {actual} bytes, header declared {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// LZ4 frame error on the encode path
    #[error("lz4 frame: {0}")]
    Lz4(#[from] lz4_flex::frame::Error),

    /// I/O while driving the frame codec
    #[error("compression i/o: {0}")]
    Io(#[from] std::io::Error),
}
