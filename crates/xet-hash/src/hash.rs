//! The 32-byte hash type and its XET string encoding

use crate::{HashError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of a hash in bytes (256 bits)
pub const HASH_BYTE_SIZE: usize = 32;

/// A 32-byte XET hash.
///
/// The canonical text form reads the hash as four little-endian u64 limbs
/// and prints each as 16 lowercase hex digits. This is deliberately *not*
/// the plain byte-order hex encoding; the string names resources on the
/// CAS server, so both directions must be preserved bit-exactly.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XetHash([u8; HASH_BYTE_SIZE]);

impl XetHash {
    /// Create a hash from raw bytes
    pub const fn from_bytes(bytes: [u8; HASH_BYTE_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash (Merkle root of an empty sequence)
    pub const fn zero() -> Self {
        Self([0u8; HASH_BYTE_SIZE])
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_BYTE_SIZE] {
        &self.0
    }

    /// Check if this hash is all zeros
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The last 8 bytes as a little-endian u64.
    ///
    /// Drives both the Merkle cut selection and global-dedup eligibility.
    pub fn tail_u64(&self) -> u64 {
        let mut limb = [0u8; 8];
        limb.copy_from_slice(&self.0[24..32]);
        u64::from_le_bytes(limb)
    }

    /// Parse from plain byte-order hex (debugging aid; the wire form is the
    /// XET string, not this)
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_string()))?;
        let arr: [u8; HASH_BYTE_SIZE] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| HashError::InvalidLength(v.len() * 2))?;
        Ok(Self(arr))
    }

    /// Plain byte-order hex (debugging aid)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for XetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for limb in self.0.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(limb);
            write!(f, "{:016x}", u64::from_le_bytes(raw))?;
        }
        Ok(())
    }
}

impl fmt::Debug for XetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XetHash({self})")
    }
}

impl FromStr for XetHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(HashError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; HASH_BYTE_SIZE];
        for (i, limb) in s.as_bytes().chunks_exact(16).enumerate() {
            let text =
                std::str::from_utf8(limb).map_err(|_| HashError::InvalidHex(s.to_string()))?;
            let value =
                u64::from_str_radix(text, 16).map_err(|_| HashError::InvalidHex(s.to_string()))?;
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&value.to_le_bytes());
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; HASH_BYTE_SIZE]> for XetHash {
    fn from(bytes: [u8; HASH_BYTE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<XetHash> for [u8; HASH_BYTE_SIZE] {
    fn from(hash: XetHash) -> Self {
        hash.0
    }
}

impl AsRef<[u8]> for XetHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for XetHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XetHash {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_string_encoding_vector() {
        // Bytes 0x00..0x1f: each limb is reversed because the limbs are
        // read little-endian.
        let hash = XetHash::from_bytes(std::array::from_fn(|i| i as u8));
        assert_eq!(
            hash.to_string(),
            "07060504030201000f0e0d0c0b0a090817161514131211101f1e1d1c1b1a1918"
        );
        let parsed: XetHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "abcd".parse::<XetHash>(),
            Err(HashError::InvalidLength(4))
        );
        let bad = "g".repeat(64);
        assert!(matches!(
            bad.parse::<XetHash>(),
            Err(HashError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_zero_hash() {
        assert!(XetHash::zero().is_zero());
        assert_eq!(XetHash::zero().to_string(), "0".repeat(64));
    }

    #[test]
    fn test_tail_u64() {
        let mut bytes = [0u8; 32];
        bytes[24] = 0x2a;
        assert_eq!(XetHash::from_bytes(bytes).tail_u64(), 42);
    }

    #[test]
    fn test_serde_round_trip() {
        let hash = XetHash::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: XetHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    proptest! {
        #[test]
        fn prop_string_round_trip(bytes in prop::array::uniform32(any::<u8>())) {
            let hash = XetHash::from_bytes(bytes);
            let round: XetHash = hash.to_string().parse().unwrap();
            prop_assert_eq!(round, hash);
        }
    }
}
