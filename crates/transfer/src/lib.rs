//! Client-side building blocks of a chunked upload.
//!
//! - [`ChunkPlan`] splits a file size into fixed-size byte ranges.
//! - [`ChunkReader`] reads one planned chunk from disk by seeking.
//! - [`HashWorker`] computes the content hash on a dedicated blocking task,
//!   fed chunk by chunk in index order over a channel.
//! - [`checksum_bytes`] produces the per-chunk SHA-256 integrity checksum.

mod checksum;
mod chunker;
mod hasher;

pub use checksum::{checksum_bytes, verify_checksum};
pub use chunker::{ChunkPlan, ChunkReader};
pub use hasher::{HashEvent, HashProgress, HashWorker, Md5Hasher, content_hash_bytes, hash_file};
pub use tessera_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("chunk index {index} out of range (file has {count} chunks)")]
    ChunkOutOfRange { index: u32, count: u32 },

    #[error("file needs more than {max} chunks", max = u32::MAX)]
    TooManyChunks,

    #[error("hash worker stopped unexpectedly")]
    HasherClosed,

    #[error("hashing failed: {0}")]
    HashFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Protocol(#[from] tessera_protocol::ProtocolError),
}
