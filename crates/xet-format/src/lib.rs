//! Binary container formats for the XET store
//!
//! Two on-wire formats live here, byte layouts normative:
//!
//! - **Xorbs** ([`xorb`]): a bare concatenation of self-describing chunk
//!   records, each individually compressed. There is no outer header; a
//!   decoder walks records, so sub-ranges of chunks can be sliced out of
//!   partial downloads.
//! - **Shards** ([`shard`]): 48-byte-record metadata describing files
//!   (reconstruction terms) and xorbs (chunk inventories), with each
//!   section closed by a bookend sentinel. Clients write the upload form
//!   (no footer) and read stored shards (footer present).
//!
//! The [`compression`] module carries the per-chunk codec: raw, LZ4
//! frame, or a 4-way byte transpose in front of LZ4, falling back to raw
//! whenever compression does not win.

pub mod compression;
mod error;
pub mod shard;
pub mod xorb;

pub use compression::{byte_group_4, byte_ungroup_4, compress_chunk, decompress_chunk, CompressionScheme};
pub use error::{FormatError, Result};
pub use shard::{
    deserialize_shard, serialize_shard, CasBlock, CasChunkSequenceEntry, FileBlock,
    FileDataSequenceEntry, FileMetadataExt, FileVerificationEntry, Shard, ShardBuilder,
    ShardFooter, CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE, FILE_FLAG_WITH_METADATA_EXT,
    FILE_FLAG_WITH_VERIFICATION, SHARD_HEADER_TAG, SHARD_VERSION,
};
pub use xorb::{
    chunk_record_offset, deserialize_xorb, extract_chunk_range, serialize_xorb, BuiltXorb,
    XorbBuilder, XorbChunk, MAX_XORB_CHUNKS, MAX_XORB_SIZE,
};
