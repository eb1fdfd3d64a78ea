//! Wire types for the reconstruction API

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xet_hash::XetHash;

/// A half-open chunk-index range `[start, end)` within a xorb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// First chunk index (inclusive)
    pub start: u32,
    /// Last chunk index (exclusive)
    pub end: u32,
}

impl ChunkRange {
    /// Whether `other` lies entirely within this range
    pub fn contains(&self, other: &ChunkRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// An inclusive byte range, as used by HTTP `Range` headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a range; `end` is inclusive
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered (both ends inclusive)
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Render as an HTTP `Range` header value
    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One reconstruction term: a chunk run inside a single xorb.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionTerm {
    /// The xorb hash
    pub hash: XetHash,
    /// Uncompressed length of the run
    pub unpacked_length: u32,
    /// Chunk-index range within the xorb
    pub range: ChunkRange,
}

/// How to fetch a sub-range of a xorb through a presigned URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchInfo {
    /// Chunk-index range the URL range covers
    pub range: ChunkRange,
    /// Presigned URL (fetched without auth headers)
    pub url: String,
    /// Byte range to request from the URL
    pub url_range: ByteRange,
}

/// Response of `GET /v1/reconstructions/{file_id}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionResponse {
    /// Bytes to discard from the front of the assembled stream
    pub offset_into_first_range: u32,
    /// Terms in file order
    pub terms: Vec<ReconstructionTerm>,
    /// Per-xorb presigned fetch descriptors
    pub fetch_info: HashMap<XetHash, Vec<FetchInfo>>,
}
