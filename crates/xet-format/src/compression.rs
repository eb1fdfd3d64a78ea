//! Per-chunk compression codec.
//!
//! Each chunk records the scheme actually used in its header byte, so the
//! encoder is free to fall back to raw storage whenever compression does
//! not shrink the payload. Scheme 2 transposes the bytes into four
//! position-modulo groups first, which lines up the bytes of fixed-width
//! numeric data (e.g. float32 tensors) and makes LZ4 considerably more
//! effective on it.

use crate::{FormatError, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{Read, Write};

/// Compression scheme tag stored in each chunk header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionScheme {
    /// Raw bytes
    None = 0,
    /// LZ4 frame
    Lz4 = 1,
    /// 4-way byte transpose, then LZ4 frame
    ByteGrouping4Lz4 = 2,
}

impl CompressionScheme {
    /// Decode a header byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::ByteGrouping4Lz4),
            other => Err(FormatError::InvalidCompression(other)),
        }
    }

    /// The header byte for this scheme.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Transpose bytes into four groups by position modulo 4.
///
/// `[a0 a1 a2 a3 b0 b1 b2 b3 ...]` becomes `[a0 b0 ... a1 b1 ... a2 b2 ...
/// a3 b3 ...]`; trailing bytes land in the leading groups.
pub fn byte_group_4(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for k in 0..4 {
        out.extend(data.iter().skip(k).step_by(4));
    }
    out
}

/// Invert [`byte_group_4`], given the original length.
pub fn byte_ungroup_4(grouped: &[u8], original_len: usize) -> Result<Vec<u8>> {
    if grouped.len() != original_len {
        return Err(FormatError::LengthMismatch {
            expected: original_len,
            actual: grouped.len(),
        });
    }
    let base = original_len / 4;
    let remainder = original_len % 4;
    let mut offsets = [0usize; 4];
    let mut acc = 0;
    for (k, offset) in offsets.iter_mut().enumerate() {
        *offset = acc;
        acc += base + usize::from(k < remainder);
    }

    let mut out = Vec::with_capacity(original_len);
    for i in 0..original_len {
        out.push(grouped[offsets[i % 4] + i / 4]);
    }
    Ok(out)
}

fn lz4_frame_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = FrameEncoder::new(Vec::with_capacity(data.len() / 2));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn lz4_frame_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    FrameDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Compress a chunk under the requested scheme.
///
/// Returns the payload together with the scheme actually used: whenever
/// the compressed form is not strictly smaller than the input, the raw
/// bytes are stored under [`CompressionScheme::None`] instead.
pub fn compress_chunk(data: &[u8], scheme: CompressionScheme) -> Result<(Vec<u8>, CompressionScheme)> {
    match scheme {
        CompressionScheme::None => Ok((data.to_vec(), CompressionScheme::None)),
        CompressionScheme::Lz4 => {
            let compressed = lz4_frame_compress(data)?;
            if compressed.len() >= data.len() {
                Ok((data.to_vec(), CompressionScheme::None))
            } else {
                Ok((compressed, CompressionScheme::Lz4))
            }
        }
        CompressionScheme::ByteGrouping4Lz4 => {
            let compressed = lz4_frame_compress(&byte_group_4(data))?;
            if compressed.len() >= data.len() {
                Ok((data.to_vec(), CompressionScheme::None))
            } else {
                Ok((compressed, CompressionScheme::ByteGrouping4Lz4))
            }
        }
    }
}

/// Decompress a chunk payload according to its recorded scheme.
pub fn decompress_chunk(
    payload: &[u8],
    scheme: CompressionScheme,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    let data = match scheme {
        CompressionScheme::None => payload.to_vec(),
        CompressionScheme::Lz4 => lz4_frame_decompress(payload)?,
        CompressionScheme::ByteGrouping4Lz4 => {
            let grouped = lz4_frame_decompress(payload)?;
            byte_ungroup_4(&grouped, uncompressed_len)?
        }
    };
    if data.len() != uncompressed_len {
        return Err(FormatError::LengthMismatch {
            expected: uncompressed_len,
            actual: data.len(),
        });
    }
    Ok(data)
}
