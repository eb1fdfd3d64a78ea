//! Merkle aggregation and the derived hash kinds.
//!
//! The tree has a variable fan-out between 2 and 9: within each level,
//! groups are cut at the first entry (from the second onward) whose hash
//! tail is divisible by the mean branching factor, falling back to the
//! maximum width. This makes group boundaries content-defined, so the
//! aggregation is stable under concatenation the same way the chunker is.

use crate::keys::{keyed_hash, DATA_KEY, INTERNAL_NODE_KEY, VERIFICATION_KEY, ZERO_KEY};
use crate::XetHash;

const MIN_CHILDREN: usize = 2;
const MAX_CHILDREN: usize = 9;
const MEAN_BRANCHING_FACTOR: u64 = 4;

/// Hash a chunk's contents.
pub fn chunk_hash(data: &[u8]) -> XetHash {
    keyed_hash(&DATA_KEY, data)
}

/// Number of leading entries to merge into the next parent node.
fn next_merge_cut(entries: &[(XetHash, u64)]) -> usize {
    if entries.len() <= MIN_CHILDREN {
        return entries.len();
    }
    let end = MAX_CHILDREN.min(entries.len());
    for (i, (hash, _)) in entries.iter().enumerate().take(end).skip(MIN_CHILDREN - 1) {
        if hash.tail_u64() % MEAN_BRANCHING_FACTOR == 0 {
            return i + 1;
        }
    }
    end
}

/// Reduce a sibling group to its parent (hash, size) entry.
///
/// The parent hashes the ASCII rendering `"<xet-string> : <size>\n"` of
/// each child, keyed with [`INTERNAL_NODE_KEY`].
fn merge_group(entries: &[(XetHash, u64)]) -> (XetHash, u64) {
    let mut buffer = String::with_capacity(entries.len() * 80);
    let mut total = 0u64;
    for (hash, size) in entries {
        buffer.push_str(&format!("{hash} : {size}\n"));
        total += size;
    }
    (keyed_hash(&INTERNAL_NODE_KEY, buffer.as_bytes()), total)
}

/// Merkle root of an ordered list of (hash, size) entries.
///
/// Empty input yields the all-zero hash.
pub fn merkle_root(entries: &[(XetHash, u64)]) -> XetHash {
    if entries.is_empty() {
        return XetHash::zero();
    }
    let mut level = entries.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / MIN_CHILDREN + 1);
        let mut idx = 0;
        while idx < level.len() {
            let cut = next_merge_cut(&level[idx..]);
            next.push(merge_group(&level[idx..idx + cut]));
            idx += cut;
        }
        level = next;
    }
    level[0].0
}

/// Xorb hash: the Merkle root over its chunks' (hash, size) pairs.
pub fn xorb_hash(chunks: &[(XetHash, u64)]) -> XetHash {
    merkle_root(chunks)
}

/// File hash: one more keyed-hash layer over the Merkle root, so a file
/// and a xorb with identical chunks get distinct names.
pub fn file_hash(chunks: &[(XetHash, u64)]) -> XetHash {
    keyed_hash(&ZERO_KEY, merkle_root(chunks).as_bytes())
}

/// Verification hash over a run of chunk hashes: the keyed hash of their
/// raw 32-byte concatenation.
pub fn verification_hash(chunk_hashes: &[XetHash]) -> XetHash {
    let mut buffer = Vec::with_capacity(chunk_hashes.len() * 32);
    for hash in chunk_hashes {
        buffer.extend_from_slice(hash.as_bytes());
    }
    keyed_hash(&VERIFICATION_KEY, &buffer)
}

/// Whether a chunk may be queried against the global dedup endpoint.
///
/// The first chunk of every file qualifies; otherwise roughly one chunk
/// in 1024 does, selected by the hash tail.
pub fn is_global_dedup_eligible(hash: &XetHash, is_first_chunk: bool) -> bool {
    is_first_chunk || hash.tail_u64() % 1024 == 0
}

/// Keyed chunk hash for matching against shards whose footer declares a
/// non-zero `chunk_hash_key`.
pub fn keyed_chunk_hash(key: &[u8; 32], chunk_hash: &XetHash) -> XetHash {
    keyed_hash(key, chunk_hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_with_tail(tail: u64) -> XetHash {
        let mut bytes = [0x11u8; 32];
        bytes[24..32].copy_from_slice(&tail.to_le_bytes());
        XetHash::from_bytes(bytes)
    }

    #[test]
    fn test_chunk_hash_vector() {
        let hash = chunk_hash(b"Hello World!");
        assert_eq!(
            hash.to_hex(),
            "a29cfb08e608d4d8726dd8659a90b9134b3240d5d8e42d5fcb28e2a6e763a3e8"
        );
        assert_eq!(
            hash.to_string(),
            "d8d408e608fb9ca213b9909a65d86d725f2de4d8d540324be8a363e7a6e228cb"
        );
    }

    #[test]
    fn test_internal_node_vector() {
        // Two entries coalesce into a single parent, which exercises the
        // "<xet> : <size>\n" buffer layout directly.
        let child1: XetHash = "c28f58387a60d4aa200c311cda7c7f77f686614864f5869eadebf765d0a14a69"
            .parse()
            .unwrap();
        let child2: XetHash = "6e4e3263e073ce2c0e78cc770c361e2778db3b054b98ab65e277fc084fa70f22"
            .parse()
            .unwrap();
        let root = merkle_root(&[(child1, 100), (child2, 200)]);
        assert_eq!(
            root.to_string(),
            "be64c7003ccd3cf4357364750e04c9592b3c36705dee76a71590c011766b6c14"
        );
    }

    #[test]
    fn test_empty_merkle_root_is_zero() {
        assert_eq!(merkle_root(&[]), XetHash::zero());
    }

    #[test]
    fn test_single_entry_root_is_identity() {
        let entry = chunk_hash(b"only one");
        assert_eq!(merkle_root(&[(entry, 8)]), entry);
    }

    #[test]
    fn test_merge_cut_at_divisible_tail() {
        // Second entry's tail is divisible by 4, so the first group takes
        // exactly two entries.
        let entries = vec![
            (hash_with_tail(1), 1),
            (hash_with_tail(8), 1),
            (hash_with_tail(3), 1),
            (hash_with_tail(5), 1),
        ];
        assert_eq!(next_merge_cut(&entries), 2);
    }

    #[test]
    fn test_merge_cut_falls_back_to_max_children() {
        let entries: Vec<_> = (0..12).map(|i| (hash_with_tail(2 * i + 1), 1)).collect();
        assert_eq!(next_merge_cut(&entries), MAX_CHILDREN);
        assert_eq!(next_merge_cut(&entries[..5]), 5);
    }

    #[test]
    fn test_file_hash_differs_from_xorb_hash() {
        let entries = vec![(chunk_hash(b"a"), 1), (chunk_hash(b"b"), 1)];
        assert_ne!(file_hash(&entries), xorb_hash(&entries));
    }

    #[test]
    fn test_verification_hash_depends_on_order() {
        let a = chunk_hash(b"a");
        let b = chunk_hash(b"b");
        assert_ne!(verification_hash(&[a, b]), verification_hash(&[b, a]));
    }

    #[test]
    fn test_global_dedup_eligibility() {
        assert!(is_global_dedup_eligible(&hash_with_tail(7), true));
        assert!(!is_global_dedup_eligible(&hash_with_tail(7), false));
        assert!(is_global_dedup_eligible(&hash_with_tail(4096), false));
        assert!(is_global_dedup_eligible(&hash_with_tail(0), false));
    }

    #[test]
    fn test_keyed_chunk_hash_changes_identity() {
        let raw = chunk_hash(b"payload");
        let key = [9u8; 32];
        assert_ne!(keyed_chunk_hash(&key, &raw), raw);
    }
}
