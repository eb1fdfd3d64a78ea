//! Hashing for the XET content-addressed store
//!
//! Everything in XET is named by a 32-byte BLAKE3 keyed hash:
//! - **Chunks** are hashed directly with [`chunk_hash`].
//! - **Xorbs** (chunk bundles) are named by a variable-fan-out Merkle
//!   aggregation over their chunks ([`xorb_hash`]).
//! - **Files** add one more keyed-hash layer on top of the Merkle root
//!   ([`file_hash`]).
//! - **Verification hashes** prove possession of a contiguous chunk range
//!   ([`verification_hash`]).
//!
//! Hashes travel as the XET string encoding (four little-endian u64 limbs,
//! each printed as 16 lowercase hex digits), which is *not* plain hex; see
//! [`XetHash`].

mod error;
mod hash;
mod keys;
mod merkle;

pub use error::{HashError, Result};
pub use hash::{XetHash, HASH_BYTE_SIZE};
pub use keys::{keyed_hash, DATA_KEY, INTERNAL_NODE_KEY, VERIFICATION_KEY, ZERO_KEY};
pub use merkle::{
    chunk_hash, file_hash, is_global_dedup_eligible, keyed_chunk_hash, merkle_root,
    verification_hash, xorb_hash,
};
