use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// Fixed-size partition of a file into contiguous byte ranges.
///
/// Index `i` covers `[i * chunk_size, min((i + 1) * chunk_size, file_size))`.
/// The plan never touches file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    count: u32,
}

impl ChunkPlan {
    /// Plans `file_size` bytes in chunks of `chunk_size`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (2 MiB) is used.
    pub fn new(file_size: u64, chunk_size: usize) -> Result<Self, TransferError> {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE as u64
        } else {
            chunk_size as u64
        };
        let count = file_size.div_ceil(chunk_size);
        let count = u32::try_from(count).map_err(|_| TransferError::TooManyChunks)?;
        Ok(Self {
            file_size,
            chunk_size,
            count,
        })
    }

    /// Number of chunks (`ceil(file_size / chunk_size)`; 0 for an empty file).
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Byte range of chunk `index`, or `None` past the end.
    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        if index >= self.count {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size);
        Some(start..end)
    }

    /// Length in bytes of chunk `index`.
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        self.range(index).map(|r| r.end - r.start)
    }

    /// All `(index, range)` pairs in index order.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (0..self.count).filter_map(move |i| self.range(i).map(|r| (i, r)))
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads planned chunks of a file by index.
pub struct ChunkReader {
    file: std::fs::File,
    plan: ChunkPlan,
}

impl ChunkReader {
    /// Opens `path` and plans it with `chunk_size` (0 = default).
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let plan = ChunkPlan::new(file_size, chunk_size)?;
        Ok(Self { file, plan })
    }

    /// Opens `path` for reading under an existing `plan`, e.g. one made
    /// when the file was hashed.
    pub fn with_plan(path: &Path, plan: ChunkPlan) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        Ok(Self { file, plan })
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Reads the bytes of chunk `index`.
    ///
    /// Fails with `UnexpectedEof` if the file shrank since it was planned.
    pub fn read_chunk(&mut self, index: u32) -> Result<Vec<u8>, TransferError> {
        let range = self.plan.range(index).ok_or(TransferError::ChunkOutOfRange {
            index,
            count: self.plan.count(),
        })?;
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
