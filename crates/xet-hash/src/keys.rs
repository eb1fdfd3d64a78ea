//! The fixed 32-byte keys of the hash hierarchy.
//!
//! These are protocol constants: every implementation must carry the
//! identical byte vectors or nothing it names will match the network.

use crate::XetHash;

/// Keyed-hash domain for chunk contents.
pub const DATA_KEY: [u8; 32] = [
    102, 151, 245, 119, 91, 149, 80, 222, 49, 53, 203, 172, 165, 151, 24, 28, 157, 228, 33, 16,
    155, 235, 43, 88, 180, 208, 176, 75, 147, 173, 242, 41,
];

/// Keyed-hash domain for internal Merkle nodes.
pub const INTERNAL_NODE_KEY: [u8; 32] = [
    1, 126, 197, 199, 165, 71, 41, 150, 253, 148, 102, 102, 180, 138, 2, 230, 93, 221, 83, 111,
    55, 199, 109, 210, 248, 99, 82, 230, 74, 83, 113, 63,
];

/// Keyed-hash domain lifting a Merkle root into a file hash.
pub const ZERO_KEY: [u8; 32] = [0u8; 32];

/// Keyed-hash domain for per-term verification hashes.
pub const VERIFICATION_KEY: [u8; 32] = [
    127, 24, 87, 214, 206, 86, 237, 102, 101, 177, 144, 98, 0, 136, 125, 96, 116, 152, 227, 32,
    243, 2, 103, 93, 169, 30, 62, 14, 103, 148, 149, 246,
];

/// BLAKE3 keyed hash of `data` under `key`.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> XetHash {
    XetHash::from_bytes(*blake3::keyed_hash(key, data).as_bytes())
}
