//! The in-process deduplication cache.
//!
//! Maps chunk hashes to where they already live: either a xorb finalized
//! by this session or one the global dedup endpoint told us about.
//! Shards whose footer declares a non-zero `chunk_hash_key` carry *keyed*
//! chunk hashes; their entries go into per-key side tables and lookups
//! re-key the local hash before matching.

use std::collections::HashMap;
use xet_format::Shard;
use xet_hash::{keyed_chunk_hash, XetHash};

/// Where a known chunk lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLocation {
    /// The xorb holding the chunk
    pub xorb_hash: XetHash,
    /// The chunk's index within that xorb
    pub chunk_index: u32,
}

struct KeyedTable {
    key: [u8; 32],
    entries: HashMap<XetHash, ChunkLocation>,
}

/// Process-local chunk-hash → location map; grows monotonically within a
/// session.
#[derive(Default)]
pub struct DeduplicationCache {
    raw: HashMap<XetHash, ChunkLocation>,
    keyed: Vec<KeyedTable>,
}

impl DeduplicationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk's location. First insertion wins.
    pub fn insert(&mut self, chunk_hash: XetHash, location: ChunkLocation) {
        self.raw.entry(chunk_hash).or_insert(location);
    }

    /// Look up a raw chunk hash, consulting keyed side tables as needed.
    pub fn get(&self, chunk_hash: &XetHash) -> Option<ChunkLocation> {
        if let Some(location) = self.raw.get(chunk_hash) {
            return Some(*location);
        }
        for table in &self.keyed {
            let keyed = keyed_chunk_hash(&table.key, chunk_hash);
            if let Some(location) = table.entries.get(&keyed) {
                return Some(*location);
            }
        }
        None
    }

    /// Fold a shard's CAS blocks into the cache.
    ///
    /// Upload-form shards and stored shards with an all-zero key land in
    /// the raw map; keyed stored shards get their own side table.
    pub fn load_shard(&mut self, shard: &Shard) {
        let chunk_key = shard
            .footer
            .as_ref()
            .map(|footer| footer.chunk_hash_key)
            .filter(|key| key != &[0u8; 32]);

        match chunk_key {
            None => {
                for block in &shard.cas_blocks {
                    for (index, entry) in block.entries.iter().enumerate() {
                        self.insert(
                            entry.chunk_hash,
                            ChunkLocation {
                                xorb_hash: block.cas_hash,
                                chunk_index: index as u32,
                            },
                        );
                    }
                }
            }
            Some(key) => {
                let index = match self.keyed.iter().position(|table| table.key == key) {
                    Some(index) => index,
                    None => {
                        self.keyed.push(KeyedTable {
                            key,
                            entries: HashMap::new(),
                        });
                        self.keyed.len() - 1
                    }
                };
                let table = &mut self.keyed[index];
                for block in &shard.cas_blocks {
                    for (index, entry) in block.entries.iter().enumerate() {
                        table.entries.entry(entry.chunk_hash).or_insert(ChunkLocation {
                            xorb_hash: block.cas_hash,
                            chunk_index: index as u32,
                        });
                    }
                }
            }
        }
    }

    /// Total number of cached locations
    pub fn len(&self) -> usize {
        self.raw.len() + self.keyed.iter().map(|table| table.entries.len()).sum::<usize>()
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
