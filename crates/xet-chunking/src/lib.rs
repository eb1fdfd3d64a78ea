//! Content-defined chunking for the XET store
//!
//! Files are cut into variable-sized chunks with a gear rolling hash so
//! that identical content produces identical chunks regardless of where
//! it sits in a file. Boundaries depend only on the bytes, never on how
//! the input was buffered, which is what makes cross-file deduplication
//! work.
//!
//! Two entry points produce identical boundaries for identical input:
//! [`chunk_bytes`] for in-memory buffers and [`StreamChunker`] for
//! readers that should not be buffered whole.

mod chunker;

pub use chunker::{chunk_bytes, Chunk, StreamChunker};

/// Minimum chunk size; boundary checks are suppressed below this.
pub const MIN_CHUNK_SIZE: usize = 8 * 1024;

/// Maximum chunk size; a boundary is forced at this length.
pub const MAX_CHUNK_SIZE: usize = 128 * 1024;

/// Boundary predicate mask: the top 16 bits of the rolling hash must be
/// zero, giving a mean chunk size of 64 KiB between the floor and cap.
pub const BOUNDARY_MASK: u64 = 0xFFFF_0000_0000_0000;
