use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A contiguous slice of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of `data[0]` within the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    /// Offset just past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks starting from any offset.
///
/// Holds only a `std::fs::File`, so it can be moved in and out of
/// `spawn_blocking` closures.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Opens `path` positioned at `offset`.
    pub fn open_at(path: &Path, chunk_size: usize, offset: u64) -> Result<Self, TransferError> {
        let mut reader = Self::new(path, chunk_size)?;
        reader.seek_to(offset)?;
        Ok(reader)
    }

    /// Stops reading at `limit` bytes even if the file has grown past it.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.file_size = self.file_size.min(limit);
        self
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    ///
    /// Short reads are retried until the chunk is full or the file ends,
    /// so every chunk but the last is exactly `chunk_size` bytes.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.offset >= self.file_size {
            return Ok(None);
        }

        let want = std::cmp::min(self.file_size - self.offset, self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let chunk = Chunk {
            offset: self.offset,
            data: buf,
        };
        self.offset += filled as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Readable size in bytes: the file size as of opening, capped by
    /// [`with_limit`](Self::with_limit).
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
