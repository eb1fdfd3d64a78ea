//! The shard container: file reconstructions and xorb inventories.
//!
//! Upload form:
//!
//! ```text
//! header(48) | file-info section | bookend(48) | cas-info section | bookend(48)
//! ```
//!
//! Every record is 48 bytes. A section ends at a bookend: 32 bytes of
//! 0xFF followed by 16 zero bytes, tested before a record is interpreted
//! as a block header. Stored shards (as returned by the global dedup
//! endpoint) append a footer the client parses but never writes.

use crate::{FormatError, Result};
use std::collections::HashSet;
use xet_hash::XetHash;

/// Shard magic: BLAKE3("xet-shard-format-v2").
pub const SHARD_HEADER_TAG: [u8; 32] = [
    29, 109, 207, 5, 84, 62, 213, 76, 232, 184, 165, 11, 139, 62, 3, 184, 146, 67, 245, 53, 83,
    129, 235, 68, 105, 95, 160, 90, 197, 103, 134, 109,
];

/// The only shard format version this codec accepts.
pub const SHARD_VERSION: u64 = 2;

/// FileBlock flag: verification entries follow the data entries.
pub const FILE_FLAG_WITH_VERIFICATION: u32 = 1;

/// FileBlock flag: an extended-metadata record follows.
pub const FILE_FLAG_WITH_METADATA_EXT: u32 = 2;

/// CAS chunk flag: the chunk may be served from the global dedup index.
pub const CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE: u32 = 0x8000_0000;

const RECORD_SIZE: usize = 48;
const BOOKEND_PREFIX: [u8; 32] = [0xFF; 32];
const FOOTER_MIN_SIZE: usize = 200;

/// A reconstruction term: a contiguous chunk-index run inside one xorb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileDataSequenceEntry {
    /// The xorb holding the chunks
    pub cas_hash: XetHash,
    /// Reserved, written as zero
    pub cas_flags: u32,
    /// Total uncompressed bytes of the run
    pub unpacked_segment_bytes: u32,
    /// First chunk index (inclusive)
    pub chunk_index_start: u32,
    /// Last chunk index (exclusive)
    pub chunk_index_end: u32,
}

/// Verification hash for one reconstruction term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileVerificationEntry {
    /// Keyed hash over the term's chunk hashes
    pub range_hash: XetHash,
}

/// Extended file metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMetadataExt {
    /// SHA-256 of the complete file contents
    pub sha256: [u8; 32],
}

/// One file's reconstruction record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBlock {
    /// The file hash
    pub file_hash: XetHash,
    /// Reconstruction terms in file order
    pub entries: Vec<FileDataSequenceEntry>,
    /// Per-term verification hashes (empty when absent)
    pub verification: Vec<FileVerificationEntry>,
    /// Optional extended metadata
    pub metadata_ext: Option<FileMetadataExt>,
}

/// One chunk's inventory entry inside a CAS block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CasChunkSequenceEntry {
    /// The chunk hash
    pub chunk_hash: XetHash,
    /// Offset of the chunk's first decompressed byte within the xorb
    pub chunk_byte_range_start: u32,
    /// Uncompressed chunk length
    pub unpacked_segment_bytes: u32,
    /// Flags; see [`CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE`]
    pub flags: u32,
}

/// One xorb's inventory record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CasBlock {
    /// The xorb hash
    pub cas_hash: XetHash,
    /// Reserved, written as zero
    pub cas_flags: u32,
    /// Per-chunk entries in xorb order
    pub entries: Vec<CasChunkSequenceEntry>,
    /// Total uncompressed bytes in the xorb
    pub num_bytes_in_cas: u32,
    /// Serialized xorb size
    pub num_bytes_on_disk: u32,
}

/// Footer of a stored shard. Clients only ever parse this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardFooter {
    pub version: u64,
    pub file_info_offset: u64,
    pub cas_info_offset: u64,
    pub file_lookup_offset: u64,
    pub file_lookup_num_entries: u64,
    pub cas_lookup_offset: u64,
    pub cas_lookup_num_entries: u64,
    pub chunk_lookup_offset: u64,
    pub chunk_lookup_num_entries: u64,
    /// When non-zero, the shard's chunk hashes are keyed under this key
    pub chunk_hash_key: [u8; 32],
    pub shard_creation_timestamp: u64,
    pub shard_key_expiry: u64,
    pub stored_bytes_on_disk: u64,
    pub materialized_bytes: u64,
    pub stored_bytes: u64,
    pub footer_offset: u64,
}

/// A parsed shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Shard {
    /// File reconstruction records
    pub file_blocks: Vec<FileBlock>,
    /// Xorb inventory records
    pub cas_blocks: Vec<CasBlock>,
    /// Present only for stored shards
    pub footer: Option<ShardFooter>,
}

fn put_u32(record: &mut [u8; RECORD_SIZE], offset: usize, value: u32) {
    record[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(record: &mut [u8; RECORD_SIZE], offset: usize, value: u64) {
    record[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn serialize_header(out: &mut Vec<u8>, footer_size: u64) {
    let mut record = [0u8; RECORD_SIZE];
    record[..32].copy_from_slice(&SHARD_HEADER_TAG);
    put_u64(&mut record, 32, SHARD_VERSION);
    put_u64(&mut record, 40, footer_size);
    out.extend_from_slice(&record);
}

fn serialize_bookend(out: &mut Vec<u8>) {
    let mut record = [0u8; RECORD_SIZE];
    record[..32].copy_from_slice(&BOOKEND_PREFIX);
    out.extend_from_slice(&record);
}

fn serialize_file_block(out: &mut Vec<u8>, block: &FileBlock) {
    let mut flags = 0u32;
    if !block.verification.is_empty() {
        flags |= FILE_FLAG_WITH_VERIFICATION;
    }
    if block.metadata_ext.is_some() {
        flags |= FILE_FLAG_WITH_METADATA_EXT;
    }

    let mut record = [0u8; RECORD_SIZE];
    record[..32].copy_from_slice(block.file_hash.as_bytes());
    put_u32(&mut record, 32, flags);
    put_u32(&mut record, 36, block.entries.len() as u32);
    out.extend_from_slice(&record);

    for entry in &block.entries {
        let mut record = [0u8; RECORD_SIZE];
        record[..32].copy_from_slice(entry.cas_hash.as_bytes());
        put_u32(&mut record, 32, entry.cas_flags);
        put_u32(&mut record, 36, entry.unpacked_segment_bytes);
        put_u32(&mut record, 40, entry.chunk_index_start);
        put_u32(&mut record, 44, entry.chunk_index_end);
        out.extend_from_slice(&record);
    }

    for entry in &block.verification {
        let mut record = [0u8; RECORD_SIZE];
        record[..32].copy_from_slice(entry.range_hash.as_bytes());
        out.extend_from_slice(&record);
    }

    if let Some(metadata) = &block.metadata_ext {
        let mut record = [0u8; RECORD_SIZE];
        record[..32].copy_from_slice(&metadata.sha256);
        out.extend_from_slice(&record);
    }
}

fn serialize_cas_block(out: &mut Vec<u8>, block: &CasBlock) {
    let mut record = [0u8; RECORD_SIZE];
    record[..32].copy_from_slice(block.cas_hash.as_bytes());
    put_u32(&mut record, 32, block.cas_flags);
    put_u32(&mut record, 36, block.entries.len() as u32);
    put_u32(&mut record, 40, block.num_bytes_in_cas);
    put_u32(&mut record, 44, block.num_bytes_on_disk);
    out.extend_from_slice(&record);

    for entry in &block.entries {
        let mut record = [0u8; RECORD_SIZE];
        record[..32].copy_from_slice(entry.chunk_hash.as_bytes());
        put_u32(&mut record, 32, entry.chunk_byte_range_start);
        put_u32(&mut record, 36, entry.unpacked_segment_bytes);
        put_u32(&mut record, 40, entry.flags);
        out.extend_from_slice(&record);
    }
}

/// Serialize a shard in upload form (footer size zero, no footer bytes).
pub fn serialize_shard(shard: &Shard) -> Vec<u8> {
    let mut out = Vec::new();
    serialize_header(&mut out, 0);
    for block in &shard.file_blocks {
        serialize_file_block(&mut out, block);
    }
    serialize_bookend(&mut out);
    for block in &shard.cas_blocks {
        serialize_cas_block(&mut out, block);
    }
    serialize_bookend(&mut out);
    out
}

/// Sequential 48-byte-record reader.
struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take_record(&mut self) -> Result<&'a [u8; RECORD_SIZE]> {
        if self.offset + RECORD_SIZE > self.data.len() {
            return Err(FormatError::Truncated {
                offset: self.offset,
                needed: self.offset + RECORD_SIZE - self.data.len(),
            });
        }
        let record: &[u8; RECORD_SIZE] = self.data[self.offset..self.offset + RECORD_SIZE]
            .try_into()
            .map_err(|_| FormatError::Truncated {
                offset: self.offset,
                needed: RECORD_SIZE,
            })?;
        self.offset += RECORD_SIZE;
        Ok(record)
    }
}

fn get_u32(record: &[u8; RECORD_SIZE], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&record[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(record: &[u8; RECORD_SIZE], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&record[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn get_hash(record: &[u8; RECORD_SIZE]) -> XetHash {
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&record[..32]);
    XetHash::from_bytes(raw)
}

fn is_bookend(record: &[u8; RECORD_SIZE]) -> bool {
    record[..32] == BOOKEND_PREFIX
}

fn parse_file_block(reader: &mut RecordReader<'_>, header: &[u8; RECORD_SIZE]) -> Result<FileBlock> {
    let file_hash = get_hash(header);
    let flags = get_u32(header, 32);
    let num_entries = get_u32(header, 36) as usize;

    let mut entries = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        let record = reader.take_record()?;
        entries.push(FileDataSequenceEntry {
            cas_hash: get_hash(record),
            cas_flags: get_u32(record, 32),
            unpacked_segment_bytes: get_u32(record, 36),
            chunk_index_start: get_u32(record, 40),
            chunk_index_end: get_u32(record, 44),
        });
    }

    let mut verification = Vec::new();
    if flags & FILE_FLAG_WITH_VERIFICATION != 0 {
        verification.reserve(num_entries);
        for _ in 0..num_entries {
            let record = reader.take_record()?;
            verification.push(FileVerificationEntry {
                range_hash: get_hash(record),
            });
        }
    }

    let metadata_ext = if flags & FILE_FLAG_WITH_METADATA_EXT != 0 {
        let record = reader.take_record()?;
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&record[..32]);
        Some(FileMetadataExt { sha256 })
    } else {
        None
    };

    Ok(FileBlock {
        file_hash,
        entries,
        verification,
        metadata_ext,
    })
}

fn parse_cas_block(reader: &mut RecordReader<'_>, header: &[u8; RECORD_SIZE]) -> Result<CasBlock> {
    let cas_hash = get_hash(header);
    let cas_flags = get_u32(header, 32);
    let num_entries = get_u32(header, 36) as usize;
    let num_bytes_in_cas = get_u32(header, 40);
    let num_bytes_on_disk = get_u32(header, 44);

    let mut entries = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        let record = reader.take_record()?;
        entries.push(CasChunkSequenceEntry {
            chunk_hash: get_hash(record),
            chunk_byte_range_start: get_u32(record, 32),
            unpacked_segment_bytes: get_u32(record, 36),
            flags: get_u32(record, 40),
        });
    }

    Ok(CasBlock {
        cas_hash,
        cas_flags,
        entries,
        num_bytes_in_cas,
        num_bytes_on_disk,
    })
}

fn parse_footer(data: &[u8], footer_size: usize) -> Result<ShardFooter> {
    if footer_size < FOOTER_MIN_SIZE || footer_size > data.len() {
        return Err(FormatError::Truncated {
            offset: data.len().saturating_sub(footer_size),
            needed: FOOTER_MIN_SIZE,
        });
    }
    let base = data.len() - footer_size;
    let read_u64 = |offset: usize| -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[base + offset..base + offset + 8]);
        u64::from_le_bytes(raw)
    };
    let mut chunk_hash_key = [0u8; 32];
    chunk_hash_key.copy_from_slice(&data[base + 72..base + 104]);

    Ok(ShardFooter {
        version: read_u64(0),
        file_info_offset: read_u64(8),
        cas_info_offset: read_u64(16),
        file_lookup_offset: read_u64(24),
        file_lookup_num_entries: read_u64(32),
        cas_lookup_offset: read_u64(40),
        cas_lookup_num_entries: read_u64(48),
        chunk_lookup_offset: read_u64(56),
        chunk_lookup_num_entries: read_u64(64),
        chunk_hash_key,
        shard_creation_timestamp: read_u64(104),
        shard_key_expiry: read_u64(112),
        stored_bytes_on_disk: read_u64(168),
        materialized_bytes: read_u64(176),
        stored_bytes: read_u64(184),
        footer_offset: read_u64(192),
    })
}

/// Parse a shard, upload form or stored form.
pub fn deserialize_shard(data: &[u8]) -> Result<Shard> {
    let mut reader = RecordReader::new(data);

    let header = reader.take_record()?;
    if header[..32] != SHARD_HEADER_TAG {
        return Err(FormatError::BadMagic);
    }
    let version = get_u64(header, 32);
    if version != SHARD_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let footer_size = get_u64(header, 40) as usize;
    let body_end = data.len().saturating_sub(footer_size);

    let mut shard = Shard::default();

    loop {
        let record = reader.take_record()?;
        if is_bookend(record) {
            break;
        }
        let block = parse_file_block(&mut reader, record)?;
        shard.file_blocks.push(block);
    }

    while reader.offset < body_end {
        let record = reader.take_record()?;
        if is_bookend(record) {
            break;
        }
        let block = parse_cas_block(&mut reader, record)?;
        shard.cas_blocks.push(block);
    }

    if footer_size > 0 {
        shard.footer = Some(parse_footer(data, footer_size)?);
    }

    Ok(shard)
}

/// Assembles a shard from upload-session output.
///
/// Repeated CAS-block additions for the same xorb hash are ignored, so a
/// xorb shared by several files is recorded once.
#[derive(Default)]
pub struct ShardBuilder {
    file_blocks: Vec<FileBlock>,
    cas_blocks: Vec<CasBlock>,
    seen_cas: HashSet<XetHash>,
}

impl ShardBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file reconstruction with one verification hash per term and
    /// an optional SHA-256 of the contents.
    pub fn add_file(
        &mut self,
        file_hash: XetHash,
        terms: Vec<FileDataSequenceEntry>,
        verification_hashes: Vec<XetHash>,
        sha256: Option<[u8; 32]>,
    ) {
        let verification = verification_hashes
            .into_iter()
            .map(|range_hash| FileVerificationEntry { range_hash })
            .collect();
        self.file_blocks.push(FileBlock {
            file_hash,
            entries: terms,
            verification,
            metadata_ext: sha256.map(|sha256| FileMetadataExt { sha256 }),
        });
    }

    /// Add a xorb inventory: chunk (hash, uncompressed size) pairs in
    /// xorb order, the serialized size, and per-chunk dedup eligibility.
    pub fn add_cas_block(
        &mut self,
        cas_hash: XetHash,
        chunks: &[(XetHash, u32)],
        serialized_size: u32,
        dedup_eligible: &[bool],
    ) {
        if !self.seen_cas.insert(cas_hash) {
            return;
        }

        let mut entries = Vec::with_capacity(chunks.len());
        let mut byte_offset = 0u32;
        for (i, (chunk_hash, size)) in chunks.iter().enumerate() {
            let mut flags = 0;
            if dedup_eligible.get(i).copied().unwrap_or(false) {
                flags |= CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE;
            }
            entries.push(CasChunkSequenceEntry {
                chunk_hash: *chunk_hash,
                chunk_byte_range_start: byte_offset,
                unpacked_segment_bytes: *size,
                flags,
            });
            byte_offset += size;
        }

        self.cas_blocks.push(CasBlock {
            cas_hash,
            cas_flags: 0,
            entries,
            num_bytes_in_cas: byte_offset,
            num_bytes_on_disk: serialized_size,
        });
    }

    /// Build the shard.
    pub fn build(self) -> Shard {
        Shard {
            file_blocks: self.file_blocks,
            cas_blocks: self.cas_blocks,
            footer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(byte: u8) -> XetHash {
        XetHash::from_bytes([byte; 32])
    }

    fn sample_shard(with_verification: bool, with_metadata: bool) -> Shard {
        let mut builder = ShardBuilder::new();
        builder.add_file(
            hash_of(1),
            vec![FileDataSequenceEntry {
                cas_hash: hash_of(2),
                cas_flags: 0,
                unpacked_segment_bytes: 1000,
                chunk_index_start: 0,
                chunk_index_end: 5,
            }],
            if with_verification {
                vec![hash_of(3)]
            } else {
                Vec::new()
            },
            with_metadata.then_some([4u8; 32]),
        );
        builder.add_cas_block(hash_of(2), &[(hash_of(5), 200), (hash_of(6), 800)], 750, &[true, false]);
        builder.build()
    }

    #[test]
    fn test_round_trip_all_flag_combinations() {
        for with_verification in [false, true] {
            for with_metadata in [false, true] {
                let shard = sample_shard(with_verification, with_metadata);
                let bytes = serialize_shard(&shard);
                let recovered = deserialize_shard(&bytes).unwrap();
                assert_eq!(recovered, shard, "verification={with_verification} metadata={with_metadata}");
            }
        }
    }

    #[test]
    fn test_serialized_layout_is_48_byte_records() {
        let shard = sample_shard(true, true);
        let bytes = serialize_shard(&shard);
        // header + file header + term + verification + metadata + bookend
        // + cas header + 2 entries + bookend
        assert_eq!(bytes.len(), 10 * RECORD_SIZE);
        assert_eq!(&bytes[..32], &SHARD_HEADER_TAG);
        // Both bookends present at their computed offsets.
        assert_eq!(&bytes[5 * RECORD_SIZE..5 * RECORD_SIZE + 32], &[0xFF; 32]);
        assert_eq!(&bytes[9 * RECORD_SIZE..9 * RECORD_SIZE + 32], &[0xFF; 32]);
    }

    #[test]
    fn test_cas_block_prefix_sums_and_flags() {
        let shard = sample_shard(false, false);
        let block = &shard.cas_blocks[0];
        assert_eq!(block.entries[0].chunk_byte_range_start, 0);
        assert_eq!(block.entries[1].chunk_byte_range_start, 200);
        assert_eq!(block.num_bytes_in_cas, 1000);
        assert_eq!(block.num_bytes_on_disk, 750);
        assert_ne!(block.entries[0].flags & CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE, 0);
        assert_eq!(block.entries[1].flags & CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE, 0);
    }

    #[test]
    fn test_duplicate_cas_blocks_are_dropped() {
        let mut builder = ShardBuilder::new();
        builder.add_cas_block(hash_of(9), &[(hash_of(1), 10)], 18, &[false]);
        builder.add_cas_block(hash_of(9), &[(hash_of(1), 10)], 18, &[false]);
        assert_eq!(builder.build().cas_blocks.len(), 1);
    }

    #[test]
    fn test_empty_shard_is_header_and_two_bookends() {
        let bytes = serialize_shard(&Shard::default());
        assert_eq!(bytes.len(), 3 * RECORD_SIZE);
        let recovered = deserialize_shard(&bytes).unwrap();
        assert!(recovered.file_blocks.is_empty());
        assert!(recovered.cas_blocks.is_empty());
        assert!(recovered.footer.is_none());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = serialize_shard(&sample_shard(false, false));
        bytes[0] ^= 0xFF;
        assert!(matches!(deserialize_shard(&bytes), Err(FormatError::BadMagic)));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut bytes = serialize_shard(&sample_shard(false, false));
        bytes[32] = 3;
        assert!(matches!(
            deserialize_shard(&bytes),
            Err(FormatError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn test_truncation_is_detected_everywhere() {
        let bytes = serialize_shard(&sample_shard(true, true));
        for cut in [10, RECORD_SIZE + 1, bytes.len() - 1] {
            assert!(
                matches!(
                    deserialize_shard(&bytes[..cut]),
                    Err(FormatError::Truncated { .. })
                ),
                "cut at {cut} not detected"
            );
        }
    }

    #[test]
    fn test_stored_shard_footer_is_parsed() {
        // Append a synthetic 200-byte footer and patch footer_size in the
        // header, mimicking what the dedup endpoint returns.
        let shard = sample_shard(false, false);
        let mut bytes = serialize_shard(&shard);
        let mut footer = vec![0u8; 200];
        footer[..8].copy_from_slice(&1u64.to_le_bytes()); // footer version
        footer[72..104].copy_from_slice(&[0xA5u8; 32]); // chunk_hash_key
        footer[104..112].copy_from_slice(&1_700_000_000u64.to_le_bytes());
        footer[168..176].copy_from_slice(&750u64.to_le_bytes());
        footer[184..192].copy_from_slice(&1000u64.to_le_bytes());
        let footer_offset = bytes.len() as u64;
        footer[192..200].copy_from_slice(&footer_offset.to_le_bytes());
        bytes.extend_from_slice(&footer);
        bytes[40..48].copy_from_slice(&200u64.to_le_bytes());

        let recovered = deserialize_shard(&bytes).unwrap();
        assert_eq!(recovered.file_blocks, shard.file_blocks);
        assert_eq!(recovered.cas_blocks, shard.cas_blocks);
        let parsed = recovered.footer.unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.chunk_hash_key, [0xA5u8; 32]);
        assert_eq!(parsed.shard_creation_timestamp, 1_700_000_000);
        assert_eq!(parsed.stored_bytes_on_disk, 750);
        assert_eq!(parsed.stored_bytes, 1000);
        assert_eq!(parsed.footer_offset, footer_offset);
    }

    #[test]
    fn test_undersized_footer_is_rejected() {
        let mut bytes = serialize_shard(&sample_shard(false, false));
        bytes.extend_from_slice(&[0u8; 64]);
        bytes[40..48].copy_from_slice(&64u64.to_le_bytes());
        assert!(matches!(
            deserialize_shard(&bytes),
            Err(FormatError::Truncated { .. })
        ));
    }
}
