//! The upload session: chunk, dedup, pack, upload, register.
//!
//! Phases run strictly in order and each hands an immutable value to the
//! next; only the dedup cache and the sealed-xorb list persist across
//! phases. Parallelism is confined to the interior of the dedup-query and
//! xorb-upload phases — a xorb is never uploaded before packing finishes,
//! and the shard is never registered before every xorb is acknowledged.

use crate::dedup::{ChunkLocation, DeduplicationCache};
use crate::{CasClient, ClientError, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use xet_chunking::chunk_bytes;
use xet_format::{
    serialize_shard, BuiltXorb, CompressionScheme, FileDataSequenceEntry, Shard, ShardBuilder,
    XorbBuilder,
};
use xet_hash::{chunk_hash, file_hash, is_global_dedup_eligible, verification_hash, XetHash};

struct IngestedChunk {
    data: Bytes,
    hash: XetHash,
    is_first: bool,
}

/// Phase-1 output: one file chunked and hashed.
struct IngestedFile {
    chunks: Vec<IngestedChunk>,
    file_hash: XetHash,
    sha256: [u8; 32],
}

/// Where one file chunk ended up during packing.
#[derive(Clone, Copy)]
struct PlacedChunk {
    xorb_hash: XetHash,
    chunk_index: u32,
    size: u32,
    is_new: bool,
}

/// Phase-3 output: the sealed xorbs plus every chunk's placement,
/// per file and in file order.
struct PackOutcome {
    xorbs: Vec<BuiltXorb>,
    placements: Vec<Vec<PlacedChunk>>,
}

/// An upload of one or more files as a single batch.
///
/// ```rust,ignore
/// let mut session = UploadSession::new(&client);
/// let file_hash = session.add_file(&data);
/// session.upload().await?;
/// ```
pub struct UploadSession<'a> {
    client: &'a CasClient,
    files: Vec<IngestedFile>,
    cache: DeduplicationCache,
    compression: CompressionScheme,
}

impl<'a> UploadSession<'a> {
    /// Start a session against `client`.
    pub fn new(client: &'a CasClient) -> Self {
        Self {
            client,
            files: Vec::new(),
            cache: DeduplicationCache::new(),
            compression: CompressionScheme::Lz4,
        }
    }

    /// Use a specific chunk compression scheme for new xorbs.
    pub fn with_compression(mut self, scheme: CompressionScheme) -> Self {
        self.compression = scheme;
        self
    }

    /// Phase 1: chunk and hash a file, returning its file hash.
    pub fn add_file(&mut self, data: &[u8]) -> XetHash {
        let sha256: [u8; 32] = Sha256::digest(data).into();

        let chunks: Vec<IngestedChunk> = chunk_bytes(data)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| IngestedChunk {
                hash: chunk_hash(&chunk.data),
                data: chunk.data,
                is_first: i == 0,
            })
            .collect();

        let entries: Vec<(XetHash, u64)> = chunks
            .iter()
            .map(|chunk| (chunk.hash, chunk.data.len() as u64))
            .collect();
        let file_hash = file_hash(&entries);

        self.files.push(IngestedFile {
            chunks,
            file_hash,
            sha256,
        });
        file_hash
    }

    /// File hashes of everything added so far, in insertion order.
    pub fn file_hashes(&self) -> Vec<XetHash> {
        self.files.iter().map(|file| file.file_hash).collect()
    }

    /// Run phases 2–6 and consume the session.
    ///
    /// Returns the file hashes, which the server can now reconstruct.
    #[instrument(skip(self), fields(files = self.files.len()))]
    pub async fn upload(mut self) -> Result<Vec<XetHash>> {
        self.query_global_dedup().await?;

        let packed = self.pack()?;
        let reused_chunks = packed
            .placements
            .iter()
            .flatten()
            .filter(|placed| !placed.is_new)
            .count();
        debug!(
            new_xorbs = packed.xorbs.len(),
            reused_chunks, "packing complete, uploading xorbs"
        );

        self.upload_xorbs(&packed.xorbs).await?;

        let shard = self.build_shard(&packed);
        self.client
            .upload_shard(Bytes::from(serialize_shard(&shard)))
            .await?;

        Ok(self.files.iter().map(|file| file.file_hash).collect())
    }

    /// Phase 2: query the global dedup endpoint for eligible chunks and
    /// fold any returned shards into the cache.
    async fn query_global_dedup(&mut self) -> Result<()> {
        if !self.client.config().enable_global_dedup {
            return Ok(());
        }

        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        for file in &self.files {
            for chunk in &file.chunks {
                if seen.insert(chunk.hash)
                    && is_global_dedup_eligible(&chunk.hash, chunk.is_first)
                    && self.cache.get(&chunk.hash).is_none()
                {
                    candidates.push(chunk.hash);
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }
        debug!(queries = candidates.len(), "querying global dedup");

        let client = self.client;
        let responses: Vec<Result<Option<Shard>>> = stream::iter(
            candidates
                .into_iter()
                .map(|hash| async move { client.query_chunk_dedup(&hash).await }),
        )
        .buffer_unordered(self.client.config().max_concurrent_requests)
        .collect()
        .await;

        for response in responses {
            if let Some(shard) = response? {
                self.cache.load_shard(&shard);
            }
        }
        Ok(())
    }

    fn seal_builder(
        &mut self,
        builder: XorbBuilder,
        pending: &mut std::collections::HashSet<XetHash>,
        placements: &mut std::collections::HashMap<XetHash, PlacedChunk>,
        xorbs: &mut Vec<BuiltXorb>,
    ) -> Result<()> {
        pending.clear();
        let built = builder.build()?;
        for (index, (hash, size)) in built
            .chunk_hashes
            .iter()
            .zip(&built.chunk_sizes)
            .enumerate()
        {
            let placed = PlacedChunk {
                xorb_hash: built.hash,
                chunk_index: index as u32,
                size: *size as u32,
                is_new: true,
            };
            placements.insert(*hash, placed);
            self.cache.insert(
                *hash,
                ChunkLocation {
                    xorb_hash: built.hash,
                    chunk_index: index as u32,
                },
            );
        }
        xorbs.push(built);
        Ok(())
    }

    /// Phase 3: place every chunk, packing cache misses into new xorbs.
    ///
    /// Chunks are visited in file order, so packing respects
    /// first-occurrence order across the whole session.
    fn pack(&mut self) -> Result<PackOutcome> {
        let mut placed: std::collections::HashMap<XetHash, PlacedChunk> =
            std::collections::HashMap::new();
        // Hashes sitting in the live builder, not yet sealed into a xorb.
        let mut pending: std::collections::HashSet<XetHash> = std::collections::HashSet::new();
        let mut xorbs = Vec::new();
        let mut builder = XorbBuilder::new(self.compression);

        // First pass: place every distinct chunk.
        let files = std::mem::take(&mut self.files);
        for file in &files {
            for chunk in &file.chunks {
                if placed.contains_key(&chunk.hash) || pending.contains(&chunk.hash) {
                    continue;
                }
                if let Some(location) = self.cache.get(&chunk.hash) {
                    placed.insert(
                        chunk.hash,
                        PlacedChunk {
                            xorb_hash: location.xorb_hash,
                            chunk_index: location.chunk_index,
                            size: chunk.data.len() as u32,
                            is_new: false,
                        },
                    );
                    continue;
                }
                if !builder.try_add(chunk.data.clone(), chunk.hash)? {
                    let full = std::mem::replace(&mut builder, XorbBuilder::new(self.compression));
                    self.seal_builder(full, &mut pending, &mut placed, &mut xorbs)?;
                    if !builder.try_add(chunk.data.clone(), chunk.hash)? {
                        return Err(ClientError::Internal(format!(
                            "chunk of {} bytes does not fit an empty xorb",
                            chunk.data.len()
                        )));
                    }
                }
                pending.insert(chunk.hash);
            }
        }
        if !builder.is_empty() {
            self.seal_builder(builder, &mut pending, &mut placed, &mut xorbs)?;
        }

        // Second pass: materialize per-file placement lists.
        let mut placements = Vec::with_capacity(files.len());
        for file in &files {
            let mut file_placements = Vec::with_capacity(file.chunks.len());
            for chunk in &file.chunks {
                let location = placed.get(&chunk.hash).copied().ok_or_else(|| {
                    ClientError::Internal(format!(
                        "chunk {} was never placed during packing",
                        chunk.hash
                    ))
                })?;
                file_placements.push(location);
            }
            placements.push(file_placements);
        }
        self.files = files;

        Ok(PackOutcome { xorbs, placements })
    }

    /// Phase 4: upload every new xorb; all must be acknowledged before
    /// the shard may be registered.
    async fn upload_xorbs(&self, xorbs: &[BuiltXorb]) -> Result<()> {
        if xorbs.is_empty() {
            return Ok(());
        }
        let client = self.client;
        let results: Vec<Result<bool>> = stream::iter(xorbs.iter().map(|xorb| {
            let hash = xorb.hash;
            let data = xorb.serialized.clone();
            async move { client.upload_xorb(&hash, data).await }
        }))
        .buffer_unordered(self.client.config().max_concurrent_requests)
        .collect()
        .await;

        for result in results {
            result?;
        }
        Ok(())
    }

    /// Coalesce one file's placements into reconstruction terms plus the
    /// per-term verification hashes.
    ///
    /// Verification hashes always come from the file's own chunk hashes:
    /// for deduplicated runs the xorb's slots may hold other files'
    /// chunks around ours, so the xorb-side hashes are not usable.
    fn coalesce_terms(
        file: &IngestedFile,
        placements: &[PlacedChunk],
    ) -> (Vec<FileDataSequenceEntry>, Vec<XetHash>) {
        struct OpenTerm {
            xorb_hash: XetHash,
            start: u32,
            end: u32,
            bytes: u32,
        }

        let mut terms = Vec::new();
        let mut open: Option<OpenTerm> = None;
        for placed in placements {
            match &mut open {
                Some(term)
                    if term.xorb_hash == placed.xorb_hash && placed.chunk_index == term.end =>
                {
                    term.end += 1;
                    term.bytes += placed.size;
                }
                _ => {
                    if let Some(term) = open.take() {
                        terms.push(FileDataSequenceEntry {
                            cas_hash: term.xorb_hash,
                            cas_flags: 0,
                            unpacked_segment_bytes: term.bytes,
                            chunk_index_start: term.start,
                            chunk_index_end: term.end,
                        });
                    }
                    open = Some(OpenTerm {
                        xorb_hash: placed.xorb_hash,
                        start: placed.chunk_index,
                        end: placed.chunk_index + 1,
                        bytes: placed.size,
                    });
                }
            }
        }
        if let Some(term) = open {
            terms.push(FileDataSequenceEntry {
                cas_hash: term.xorb_hash,
                cas_flags: 0,
                unpacked_segment_bytes: term.bytes,
                chunk_index_start: term.start,
                chunk_index_end: term.end,
            });
        }

        let mut verification = Vec::with_capacity(terms.len());
        let mut cursor = 0usize;
        for term in &terms {
            let count = (term.chunk_index_end - term.chunk_index_start) as usize;
            let hashes: Vec<XetHash> = file.chunks[cursor..cursor + count]
                .iter()
                .map(|chunk| chunk.hash)
                .collect();
            verification.push(verification_hash(&hashes));
            cursor += count;
        }

        (terms, verification)
    }

    /// Phase 5: assemble the shard describing every file and new xorb.
    fn build_shard(&self, packed: &PackOutcome) -> Shard {
        let mut builder = ShardBuilder::new();

        for (file, placements) in self.files.iter().zip(&packed.placements) {
            let (terms, verification) = Self::coalesce_terms(file, placements);
            builder.add_file(file.file_hash, terms, verification, Some(file.sha256));
        }

        for xorb in &packed.xorbs {
            let chunks: Vec<(XetHash, u32)> = xorb
                .chunk_hashes
                .iter()
                .zip(&xorb.chunk_sizes)
                .map(|(hash, size)| (*hash, *size as u32))
                .collect();
            let eligible: Vec<bool> = xorb
                .chunk_hashes
                .iter()
                .enumerate()
                .map(|(i, hash)| is_global_dedup_eligible(hash, i == 0))
                .collect();
            builder.add_cas_block(
                xorb.hash,
                &chunks,
                xorb.serialized.len() as u32,
                &eligible,
            );
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(xorb: u8, index: u32, size: u32) -> PlacedChunk {
        PlacedChunk {
            xorb_hash: XetHash::from_bytes([xorb; 32]),
            chunk_index: index,
            size,
            is_new: true,
        }
    }

    fn ingested(chunk_data: &[&[u8]]) -> IngestedFile {
        let chunks: Vec<IngestedChunk> = chunk_data
            .iter()
            .enumerate()
            .map(|(i, data)| IngestedChunk {
                data: Bytes::copy_from_slice(data),
                hash: chunk_hash(data),
                is_first: i == 0,
            })
            .collect();
        let entries: Vec<(XetHash, u64)> = chunks
            .iter()
            .map(|c| (c.hash, c.data.len() as u64))
            .collect();
        IngestedFile {
            file_hash: file_hash(&entries),
            sha256: [0u8; 32],
            chunks,
        }
    }

    #[test]
    fn test_consecutive_chunks_coalesce_into_one_term() {
        let file = ingested(&[b"aa", b"bb", b"cc"]);
        let placements = vec![placed(1, 0, 2), placed(1, 1, 2), placed(1, 2, 2)];
        let (terms, verification) = UploadSession::coalesce_terms(&file, &placements);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].chunk_index_start, 0);
        assert_eq!(terms[0].chunk_index_end, 3);
        assert_eq!(terms[0].unpacked_segment_bytes, 6);
        assert_eq!(verification.len(), 1);
        let hashes: Vec<XetHash> = file.chunks.iter().map(|c| c.hash).collect();
        assert_eq!(verification[0], verification_hash(&hashes));
    }

    #[test]
    fn test_xorb_switch_closes_the_term() {
        let file = ingested(&[b"aa", b"bb", b"cc"]);
        let placements = vec![placed(1, 0, 2), placed(2, 5, 2), placed(2, 6, 2)];
        let (terms, verification) = UploadSession::coalesce_terms(&file, &placements);
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].chunk_index_end, 1);
        assert_eq!(terms[1].chunk_index_start, 5);
        assert_eq!(terms[1].chunk_index_end, 7);
        // Verification hashes are file-local: the second term covers the
        // file's second and third chunks regardless of xorb slot numbers.
        let hashes: Vec<XetHash> = file.chunks[1..3].iter().map(|c| c.hash).collect();
        assert_eq!(verification[1], verification_hash(&hashes));
    }

    #[test]
    fn test_non_consecutive_same_xorb_splits_terms() {
        let file = ingested(&[b"aa", b"bb"]);
        let placements = vec![placed(1, 0, 2), placed(1, 4, 2)];
        let (terms, _) = UploadSession::coalesce_terms(&file, &placements);
        assert_eq!(terms.len(), 2);
    }
}
