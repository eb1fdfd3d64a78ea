//! The gear-hash chunker, buffered and streaming.

use crate::{BOUNDARY_MASK, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use bytes::Bytes;
use gearhash::DEFAULT_TABLE;
use std::io::{self, Read};

/// A chunk of input data with its byte offset in the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk bytes
    pub data: Bytes,
    /// Offset of the first byte within the source stream
    pub offset: u64,
}

impl Chunk {
    /// Chunk length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk is empty (never produced by the chunker)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[inline]
fn gear_update(hash: u64, byte: u8) -> u64 {
    hash.wrapping_shl(1).wrapping_add(DEFAULT_TABLE[byte as usize])
}

/// Whether a chunk of `len` bytes ends at a boundary given the rolling hash.
///
/// Below the minimum size no boundary is declared; at the maximum size one
/// is forced. The hash covers every byte since the previous boundary.
#[inline]
fn is_boundary(hash: u64, len: usize) -> bool {
    len >= MIN_CHUNK_SIZE && (len >= MAX_CHUNK_SIZE || hash & BOUNDARY_MASK == 0)
}

/// Split an in-memory buffer into chunks.
///
/// Empty input yields no chunks. Trailing bytes after the last boundary
/// form a final chunk that may be shorter than the minimum size.
pub fn chunk_bytes(data: &[u8]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut hash: u64 = 0;
    let mut start = 0usize;

    for (i, &byte) in data.iter().enumerate() {
        hash = gear_update(hash, byte);
        if is_boundary(hash, i - start + 1) {
            chunks.push(Chunk {
                data: Bytes::copy_from_slice(&data[start..=i]),
                offset: start as u64,
            });
            start = i + 1;
            hash = 0;
        }
    }

    if start < data.len() {
        chunks.push(Chunk {
            data: Bytes::copy_from_slice(&data[start..]),
            offset: start as u64,
        });
    }

    chunks
}

/// Lazy chunker over any [`Read`] source.
///
/// Yields `io::Result<Chunk>`; boundaries are identical to [`chunk_bytes`]
/// for the same byte sequence, independent of the read-buffer size.
pub struct StreamChunker<R> {
    source: R,
    read_buf: Vec<u8>,
    filled: usize,
    pos: usize,
    pending: Vec<u8>,
    hash: u64,
    next_offset: u64,
    eof: bool,
}

const DEFAULT_READ_BUF: usize = 64 * 1024;

impl<R: Read> StreamChunker<R> {
    /// Chunk `source` with the default read-buffer size.
    pub fn new(source: R) -> Self {
        Self::with_buffer_size(source, DEFAULT_READ_BUF)
    }

    /// Chunk `source` with a caller-chosen read-buffer size.
    pub fn with_buffer_size(source: R, buffer_size: usize) -> Self {
        Self {
            source,
            read_buf: vec![0u8; buffer_size.max(1)],
            filled: 0,
            pos: 0,
            pending: Vec::with_capacity(MAX_CHUNK_SIZE),
            hash: 0,
            next_offset: 0,
            eof: false,
        }
    }

    fn take_pending(&mut self) -> Chunk {
        let data = Bytes::from(std::mem::take(&mut self.pending));
        let chunk = Chunk {
            offset: self.next_offset,
            data,
        };
        self.next_offset += chunk.len() as u64;
        self.hash = 0;
        self.pending = Vec::with_capacity(MAX_CHUNK_SIZE);
        chunk
    }
}

impl<R: Read> Iterator for StreamChunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while self.pos < self.filled {
                let byte = self.read_buf[self.pos];
                self.pos += 1;
                self.hash = gear_update(self.hash, byte);
                self.pending.push(byte);
                if is_boundary(self.hash, self.pending.len()) {
                    return Some(Ok(self.take_pending()));
                }
            }

            if self.eof {
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(self.take_pending()));
            }

            match self.source.read(&mut self.read_buf) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.filled = n;
                    self.pos = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
