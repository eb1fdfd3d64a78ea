//! The download session: reconstruction, ranged fetches, assembly.
//!
//! Every presigned range a xorb advertises is fetched and kept tagged
//! with the chunk range it covers. Same-xorb fetches are then merged
//! into maximal contiguous runs — adjoining regions concatenate,
//! overlapping ones are spliced at chunk-record boundaries — so the
//! union of the advertised ranges satisfies every term, including terms
//! that straddle two fetches. Nothing is overwritten; a term only fails
//! if the union genuinely leaves a hole under it.

use crate::{ByteRange, CasClient, ChunkRange, ClientError, ReconstructionResponse, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};
use xet_format::{chunk_record_offset, extract_chunk_range};
use xet_hash::{chunk_hash, XetHash};

struct FetchedRegion {
    chunk_range: ChunkRange,
    bytes: Bytes,
}

/// A maximal contiguous run of fetched chunk records for one xorb.
struct AssembledRun {
    chunk_range: ChunkRange,
    bytes: Vec<u8>,
}

/// Downloads files by hash, whole or by byte range.
pub struct DownloadSession<'a> {
    client: &'a CasClient,
}

impl<'a> DownloadSession<'a> {
    /// Start a session against `client`.
    pub fn new(client: &'a CasClient) -> Self {
        Self { client }
    }

    /// Download a file, or the inclusive `byte_range` of it.
    #[instrument(skip(self))]
    pub async fn download(
        &self,
        file_hash: &XetHash,
        byte_range: Option<ByteRange>,
    ) -> Result<Bytes> {
        let recon = self.client.get_reconstruction(file_hash, byte_range).await?;
        debug!(terms = recon.terms.len(), "reconstruction resolved");

        let fetched = self.fetch_regions(&recon).await?;
        let mut runs: HashMap<XetHash, Vec<AssembledRun>> = HashMap::new();
        for (xorb_hash, regions) in fetched {
            runs.insert(xorb_hash, merge_regions(regions)?);
        }

        // Assemble terms in order, slicing each one's chunk range out of
        // the contiguous run that covers it.
        let verify = self.client.config().verify_downloads && byte_range.is_none();
        let mut assembled = Vec::new();
        let mut chunk_entries: Vec<(XetHash, u64)> = Vec::new();
        for term in &recon.terms {
            let xorb_runs = runs.get(&term.hash).ok_or_else(|| {
                ClientError::InvalidResponse(format!("no fetch info for xorb {}", term.hash))
            })?;
            let run = xorb_runs
                .iter()
                .find(|run| run.chunk_range.contains(&term.range))
                .ok_or_else(|| {
                    ClientError::InvalidResponse(format!(
                        "fetched ranges leave a hole under chunks [{}, {}) of xorb {}",
                        term.range.start, term.range.end, term.hash
                    ))
                })?;
            let relative_start = (term.range.start - run.chunk_range.start) as usize;
            let relative_end = (term.range.end - run.chunk_range.start) as usize;
            let chunks = extract_chunk_range(&run.bytes, relative_start, relative_end)?;
            for chunk in &chunks {
                if verify {
                    chunk_entries.push((chunk_hash(chunk), chunk.len() as u64));
                }
                assembled.extend_from_slice(chunk);
            }
        }

        if verify {
            let computed = xet_hash::file_hash(&chunk_entries);
            if computed != *file_hash {
                return Err(ClientError::HashMismatch {
                    expected: *file_hash,
                    computed,
                });
            }
        }

        // Trim to the requested window.
        let skip = (recon.offset_into_first_range as usize).min(assembled.len());
        let mut result = Bytes::from(assembled).slice(skip..);
        if let Some(range) = byte_range {
            let keep = (range.byte_len() as usize).min(result.len());
            result = result.slice(..keep);
        }
        Ok(result)
    }

    /// Fetch every advertised presigned range of every referenced xorb.
    async fn fetch_regions(
        &self,
        recon: &ReconstructionResponse,
    ) -> Result<HashMap<XetHash, Vec<FetchedRegion>>> {
        let referenced: HashSet<XetHash> = recon.terms.iter().map(|term| term.hash).collect();

        let mut plan = Vec::new();
        for xorb_hash in &referenced {
            let infos = recon.fetch_info.get(xorb_hash).ok_or_else(|| {
                ClientError::InvalidResponse(format!("no fetch info for xorb {xorb_hash}"))
            })?;
            for info in infos {
                plan.push((*xorb_hash, info.clone()));
            }
        }

        let client = self.client;
        let fetched: Vec<Result<(XetHash, ChunkRange, Bytes)>> =
            stream::iter(plan.into_iter().map(|(xorb_hash, info)| async move {
                let bytes = client
                    .fetch_presigned(&info.url, Some(info.url_range))
                    .await?;
                Ok((xorb_hash, info.range, bytes))
            }))
            .buffer_unordered(self.client.config().max_concurrent_requests)
            .collect()
            .await;

        let mut regions: HashMap<XetHash, Vec<FetchedRegion>> = HashMap::new();
        for result in fetched {
            let (xorb_hash, chunk_range, bytes) = result?;
            regions
                .entry(xorb_hash)
                .or_default()
                .push(FetchedRegion { chunk_range, bytes });
        }
        Ok(regions)
    }
}

/// Merge one xorb's fetched regions into maximal contiguous runs.
///
/// Regions are sorted by chunk start; a region that adjoins or overlaps
/// the current run extends it (overlapping chunk records are dropped at
/// a record boundary), while a gap starts a new run. Gaps are fine per
/// se — a ranged reconstruction only advertises the chunks it needs —
/// they just must not fall under a term.
fn merge_regions(mut regions: Vec<FetchedRegion>) -> Result<Vec<AssembledRun>> {
    regions.sort_by_key(|region| (region.chunk_range.start, region.chunk_range.end));

    let mut runs: Vec<AssembledRun> = Vec::new();
    for region in regions {
        match runs.last_mut() {
            Some(run) if region.chunk_range.start <= run.chunk_range.end => {
                if region.chunk_range.end <= run.chunk_range.end {
                    // Entirely inside what we already have.
                    continue;
                }
                let overlap = (run.chunk_range.end - region.chunk_range.start) as usize;
                let skip = chunk_record_offset(&region.bytes, overlap)?;
                run.bytes.extend_from_slice(&region.bytes[skip..]);
                run.chunk_range.end = region.chunk_range.end;
            }
            _ => {
                runs.push(AssembledRun {
                    chunk_range: region.chunk_range,
                    bytes: region.bytes.to_vec(),
                });
            }
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use xet_format::{serialize_xorb, CompressionScheme, XorbChunk};

    fn region(chunks: &[XorbChunk], range: ChunkRange) -> FetchedRegion {
        let bytes = serialize_xorb(
            &chunks[range.start as usize..range.end as usize],
            CompressionScheme::Lz4,
        )
        .unwrap();
        FetchedRegion {
            chunk_range: range,
            bytes: Bytes::from(bytes),
        }
    }

    fn sample_chunks(count: usize) -> Vec<XorbChunk> {
        (0..count)
            .map(|i| XorbChunk::new(Bytes::from(vec![i as u8; 9000 + i])))
            .collect()
    }

    fn run_chunks(run: &AssembledRun) -> Vec<Bytes> {
        let len = (run.chunk_range.end - run.chunk_range.start) as usize;
        extract_chunk_range(&run.bytes, 0, len).unwrap()
    }

    #[test]
    fn test_adjoining_regions_merge_into_one_run() {
        let chunks = sample_chunks(5);
        let runs = merge_regions(vec![
            region(&chunks, ChunkRange { start: 2, end: 5 }),
            region(&chunks, ChunkRange { start: 0, end: 2 }),
        ])
        .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].chunk_range, ChunkRange { start: 0, end: 5 });
        let restored = run_chunks(&runs[0]);
        for (restored, chunk) in restored.iter().zip(&chunks) {
            assert_eq!(restored, &chunk.data);
        }
    }

    #[test]
    fn test_overlapping_regions_splice_at_record_boundary() {
        let chunks = sample_chunks(6);
        let runs = merge_regions(vec![
            region(&chunks, ChunkRange { start: 0, end: 4 }),
            region(&chunks, ChunkRange { start: 2, end: 6 }),
        ])
        .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].chunk_range, ChunkRange { start: 0, end: 6 });
        let restored = run_chunks(&runs[0]);
        assert_eq!(restored.len(), 6);
        for (restored, chunk) in restored.iter().zip(&chunks) {
            assert_eq!(restored, &chunk.data);
        }
    }

    #[test]
    fn test_contained_region_is_dropped() {
        let chunks = sample_chunks(4);
        let runs = merge_regions(vec![
            region(&chunks, ChunkRange { start: 0, end: 4 }),
            region(&chunks, ChunkRange { start: 1, end: 3 }),
        ])
        .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(run_chunks(&runs[0]).len(), 4);
    }

    #[test]
    fn test_gap_starts_a_new_run() {
        let chunks = sample_chunks(6);
        let runs = merge_regions(vec![
            region(&chunks, ChunkRange { start: 0, end: 2 }),
            region(&chunks, ChunkRange { start: 4, end: 6 }),
        ])
        .unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].chunk_range, ChunkRange { start: 0, end: 2 });
        assert_eq!(runs[1].chunk_range, ChunkRange { start: 4, end: 6 });
    }
}
