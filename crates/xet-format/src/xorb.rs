//! The xorb container: a concatenation of self-describing chunk records.
//!
//! Record layout (8-byte header, then payload):
//!
//! | offset | bytes | field |
//! |---|---|---|
//! | 0 | 1 | version (must be 0) |
//! | 1 | 3 | compressed size, LE u24 |
//! | 4 | 1 | compression scheme |
//! | 5 | 3 | uncompressed size, LE u24 |
//!
//! There is no outer header, trailer, or index: readers walk records.
//! That is what lets the download path slice arbitrary chunk ranges out
//! of a partially fetched xorb.

use crate::compression::{compress_chunk, decompress_chunk, CompressionScheme};
use crate::{FormatError, Result};
use bytes::Bytes;
use xet_hash::{chunk_hash, xorb_hash, XetHash};

/// Maximum serialized size of a xorb.
pub const MAX_XORB_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of chunks in a xorb.
pub const MAX_XORB_CHUNKS: usize = 8192;

const CHUNK_HEADER_SIZE: usize = 8;
const CHUNK_VERSION: u8 = 0;

/// A decompressed chunk held in a xorb.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XorbChunk {
    /// Uncompressed chunk bytes
    pub data: Bytes,
    /// The chunk's content hash
    pub hash: XetHash,
}

impl XorbChunk {
    /// Create a chunk entry, hashing the data.
    pub fn new(data: Bytes) -> Self {
        let hash = chunk_hash(&data);
        Self { data, hash }
    }
}

fn write_u24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
}

/// One parsed chunk record header.
struct RecordHeader {
    compressed_len: usize,
    scheme: CompressionScheme,
    uncompressed_len: usize,
}

/// Parse the record header at `offset`, returning the header and the
/// payload slice.
fn read_record(data: &[u8], offset: usize) -> Result<(RecordHeader, &[u8])> {
    if offset + CHUNK_HEADER_SIZE > data.len() {
        return Err(FormatError::Truncated {
            offset,
            needed: offset + CHUNK_HEADER_SIZE - data.len(),
        });
    }
    let header = &data[offset..offset + CHUNK_HEADER_SIZE];
    if header[0] != CHUNK_VERSION {
        return Err(FormatError::UnsupportedVersion(u64::from(header[0])));
    }
    let compressed_len = read_u24(&header[1..4]) as usize;
    let scheme = CompressionScheme::from_byte(header[4])?;
    let uncompressed_len = read_u24(&header[5..8]) as usize;

    let payload_start = offset + CHUNK_HEADER_SIZE;
    if payload_start + compressed_len > data.len() {
        return Err(FormatError::Truncated {
            offset: payload_start,
            needed: payload_start + compressed_len - data.len(),
        });
    }
    Ok((
        RecordHeader {
            compressed_len,
            scheme,
            uncompressed_len,
        },
        &data[payload_start..payload_start + compressed_len],
    ))
}

/// Serialize chunks into xorb form, compressing each under `scheme`.
pub fn serialize_xorb(chunks: &[XorbChunk], scheme: CompressionScheme) -> Result<Vec<u8>> {
    if chunks.len() > MAX_XORB_CHUNKS {
        return Err(FormatError::OversizeXorb(format!(
            "{} chunks, limit is {MAX_XORB_CHUNKS}",
            chunks.len()
        )));
    }

    let mut out = Vec::new();
    for chunk in chunks {
        let (payload, used) = compress_chunk(&chunk.data, scheme)?;
        out.push(CHUNK_VERSION);
        write_u24(&mut out, payload.len() as u32);
        out.push(used.as_byte());
        write_u24(&mut out, chunk.data.len() as u32);
        out.extend_from_slice(&payload);
    }

    if out.len() > MAX_XORB_SIZE {
        return Err(FormatError::OversizeXorb(format!(
            "{} serialized bytes, limit is {MAX_XORB_SIZE}",
            out.len()
        )));
    }
    Ok(out)
}

/// Deserialize a complete xorb, decompressing and re-hashing every chunk.
pub fn deserialize_xorb(data: &[u8]) -> Result<Vec<XorbChunk>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (header, payload) = read_record(data, offset)?;
        let bytes = decompress_chunk(payload, header.scheme, header.uncompressed_len)?;
        chunks.push(XorbChunk::new(Bytes::from(bytes)));
        offset += CHUNK_HEADER_SIZE + header.compressed_len;
    }
    Ok(chunks)
}

/// Byte offset of the start of the `n`th chunk record within serialized
/// xorb bytes.
///
/// Lets callers splice record-aligned byte regions of the same xorb, e.g.
/// when two fetched ranges overlap by a few chunks.
pub fn chunk_record_offset(data: &[u8], n: usize) -> Result<usize> {
    let mut offset = 0;
    for _ in 0..n {
        let (header, _) = read_record(data, offset)?;
        offset += CHUNK_HEADER_SIZE + header.compressed_len;
    }
    Ok(offset)
}

/// Decompress the chunk-index range `[start, end)` from serialized xorb
/// bytes, skipping the payloads outside the range.
pub fn extract_chunk_range(data: &[u8], start: usize, end: usize) -> Result<Vec<Bytes>> {
    let mut chunks = Vec::with_capacity(end.saturating_sub(start));
    let mut offset = 0;
    let mut index = 0;
    while offset < data.len() && index < end {
        let (header, payload) = read_record(data, offset)?;
        if index >= start {
            let bytes = decompress_chunk(payload, header.scheme, header.uncompressed_len)?;
            chunks.push(Bytes::from(bytes));
        }
        offset += CHUNK_HEADER_SIZE + header.compressed_len;
        index += 1;
    }
    if index < end {
        return Err(FormatError::Truncated {
            offset,
            needed: CHUNK_HEADER_SIZE,
        });
    }
    Ok(chunks)
}

/// A sealed xorb ready for upload and shard registration.
#[derive(Clone, Debug)]
pub struct BuiltXorb {
    /// Merkle hash over the chunks' (hash, size) pairs
    pub hash: XetHash,
    /// Serialized container bytes
    pub serialized: Bytes,
    /// Chunk hashes in order
    pub chunk_hashes: Vec<XetHash>,
    /// Uncompressed chunk sizes in order
    pub chunk_sizes: Vec<u64>,
}

impl BuiltXorb {
    /// Number of chunks in the xorb
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Total uncompressed bytes
    pub fn unpacked_len(&self) -> u64 {
        self.chunk_sizes.iter().sum()
    }
}

struct PendingChunk {
    data: Bytes,
    hash: XetHash,
    payload: Vec<u8>,
    scheme: CompressionScheme,
}

/// Incremental xorb assembly with conservative capacity checks.
///
/// Admission uses the uncompressed chunk length (`8 + len`) against the
/// serialized-size cap, so a builder never has to evict a chunk after
/// compressing it.
pub struct XorbBuilder {
    scheme: CompressionScheme,
    pending: Vec<PendingChunk>,
    serialized_len: usize,
}

impl XorbBuilder {
    /// Create a builder compressing chunks under `scheme`.
    pub fn new(scheme: CompressionScheme) -> Self {
        Self {
            scheme,
            pending: Vec::new(),
            serialized_len: 0,
        }
    }

    /// Whether a chunk of `data_len` uncompressed bytes still fits.
    pub fn can_add(&self, data_len: usize) -> bool {
        self.pending.len() < MAX_XORB_CHUNKS
            && self.serialized_len + CHUNK_HEADER_SIZE + data_len <= MAX_XORB_SIZE
    }

    /// Add a chunk with its precomputed hash.
    ///
    /// Returns `Ok(false)` when the xorb is full; the caller seals it and
    /// retries against a fresh builder.
    pub fn try_add(&mut self, data: Bytes, hash: XetHash) -> Result<bool> {
        if !self.can_add(data.len()) {
            return Ok(false);
        }
        let (payload, scheme) = compress_chunk(&data, self.scheme)?;
        self.serialized_len += CHUNK_HEADER_SIZE + payload.len();
        self.pending.push(PendingChunk {
            data,
            hash,
            payload,
            scheme,
        });
        Ok(true)
    }

    /// Whether no chunks have been added
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of chunks added so far
    pub fn chunk_count(&self) -> usize {
        self.pending.len()
    }

    /// Seal the builder into an uploadable xorb.
    pub fn build(self) -> Result<BuiltXorb> {
        let mut out = Vec::with_capacity(self.serialized_len);
        let mut chunk_hashes = Vec::with_capacity(self.pending.len());
        let mut chunk_sizes = Vec::with_capacity(self.pending.len());
        let mut entries = Vec::with_capacity(self.pending.len());

        for chunk in &self.pending {
            out.push(CHUNK_VERSION);
            write_u24(&mut out, chunk.payload.len() as u32);
            out.push(chunk.scheme.as_byte());
            write_u24(&mut out, chunk.data.len() as u32);
            out.extend_from_slice(&chunk.payload);

            chunk_hashes.push(chunk.hash);
            chunk_sizes.push(chunk.data.len() as u64);
            entries.push((chunk.hash, chunk.data.len() as u64));
        }

        if out.len() > MAX_XORB_SIZE {
            return Err(FormatError::OversizeXorb(format!(
                "{} serialized bytes, limit is {MAX_XORB_SIZE}",
                out.len()
            )));
        }

        Ok(BuiltXorb {
            hash: xorb_hash(&entries),
            serialized: Bytes::from(out),
            chunk_hashes,
            chunk_sizes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    fn test_chunks() -> Vec<XorbChunk> {
        vec![
            XorbChunk::new(Bytes::from_static(b"This is chunk 1 data")),
            XorbChunk::new(Bytes::from(vec![0u8; 20_000])),
            XorbChunk::new(Bytes::from_static(
                b"This is chunk 2 data with more content",
            )),
        ]
    }

    #[test]
    fn test_serialize_round_trip() {
        let chunks = test_chunks();
        for scheme in [
            CompressionScheme::None,
            CompressionScheme::Lz4,
            CompressionScheme::ByteGrouping4Lz4,
        ] {
            let serialized = serialize_xorb(&chunks, scheme).unwrap();
            let recovered = deserialize_xorb(&serialized).unwrap();
            assert_eq!(recovered, chunks, "scheme {scheme:?}");
        }
    }

    #[test]
    fn test_extract_chunk_range() {
        let chunks = test_chunks();
        let serialized = serialize_xorb(&chunks, CompressionScheme::Lz4).unwrap();
        let middle = extract_chunk_range(&serialized, 1, 3).unwrap();
        assert_eq!(middle.len(), 2);
        assert_eq!(middle[0], chunks[1].data);
        assert_eq!(middle[1], chunks[2].data);

        let empty = extract_chunk_range(&serialized, 1, 1).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_chunk_record_offset() {
        let chunks = test_chunks();
        let serialized = serialize_xorb(&chunks, CompressionScheme::Lz4).unwrap();
        assert_eq!(chunk_record_offset(&serialized, 0).unwrap(), 0);
        // Splitting at a record offset yields the same chunks as slicing.
        let offset = chunk_record_offset(&serialized, 1).unwrap();
        let tail = deserialize_xorb(&serialized[offset..]).unwrap();
        assert_eq!(tail, chunks[1..]);
        assert_eq!(
            chunk_record_offset(&serialized, chunks.len()).unwrap(),
            serialized.len()
        );
        assert!(matches!(
            chunk_record_offset(&serialized, chunks.len() + 1),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_extract_range_past_end_is_truncated() {
        let serialized = serialize_xorb(&test_chunks(), CompressionScheme::Lz4).unwrap();
        assert!(matches!(
            extract_chunk_range(&serialized, 0, 4),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_version() {
        let mut serialized = serialize_xorb(&test_chunks(), CompressionScheme::None).unwrap();
        serialized[0] = 1;
        assert!(matches!(
            deserialize_xorb(&serialized),
            Err(FormatError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_deserialize_rejects_truncated_payload() {
        let serialized = serialize_xorb(&test_chunks(), CompressionScheme::None).unwrap();
        assert!(matches!(
            deserialize_xorb(&serialized[..serialized.len() - 3]),
            Err(FormatError::Truncated { .. })
        ));
        assert!(matches!(
            deserialize_xorb(&serialized[..5]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_builder_matches_direct_serialization() {
        let mut data = vec![0u8; 150_000];
        StdRng::seed_from_u64(7).fill_bytes(&mut data);
        let chunks: Vec<XorbChunk> = data
            .chunks(30_000)
            .map(|c| XorbChunk::new(Bytes::copy_from_slice(c)))
            .collect();

        let mut builder = XorbBuilder::new(CompressionScheme::Lz4);
        for chunk in &chunks {
            assert!(builder.try_add(chunk.data.clone(), chunk.hash).unwrap());
        }
        let built = builder.build().unwrap();

        let direct = serialize_xorb(&chunks, CompressionScheme::Lz4).unwrap();
        assert_eq!(&built.serialized[..], &direct[..]);
        assert_eq!(built.chunk_count(), chunks.len());
        assert_eq!(built.unpacked_len(), 150_000);

        let entries: Vec<_> = chunks.iter().map(|c| (c.hash, c.data.len() as u64)).collect();
        assert_eq!(built.hash, xorb_hash(&entries));
    }

    #[test]
    fn test_builder_rejects_when_chunk_limit_reached() {
        let mut builder = XorbBuilder::new(CompressionScheme::None);
        let tiny = Bytes::from_static(b"x");
        for _ in 0..MAX_XORB_CHUNKS {
            assert!(builder.try_add(tiny.clone(), chunk_hash(&tiny)).unwrap());
        }
        assert!(!builder.try_add(tiny.clone(), chunk_hash(&tiny)).unwrap());
        assert_eq!(builder.chunk_count(), MAX_XORB_CHUNKS);
    }

    #[test]
    fn test_builder_size_estimate_is_conservative() {
        let builder = XorbBuilder::new(CompressionScheme::None);
        assert!(!builder.can_add(MAX_XORB_SIZE));
        assert!(builder.can_add(MAX_XORB_SIZE - CHUNK_HEADER_SIZE));
    }

    #[test]
    fn test_serialize_rejects_too_many_chunks() {
        let chunks = vec![XorbChunk::new(Bytes::from_static(b"c")); MAX_XORB_CHUNKS + 1];
        assert!(matches!(
            serialize_xorb(&chunks, CompressionScheme::None),
            Err(FormatError::OversizeXorb(_))
        ));
    }
}
