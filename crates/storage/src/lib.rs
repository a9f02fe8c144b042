//! Server-side storage for chunked uploads.
//!
//! Chunks land in a [`ChunkStore`] as they arrive, in any order. Once every
//! index is registered, the [`MergeAssembler`] concatenates them into the
//! final artifact and marks the registry record completed.

mod assembler;
mod chunk_store;
mod metadata;
mod validation;

pub use assembler::{MergeAssembler, MergeOutput};
pub use chunk_store::{ChunkStore, DiskChunkStore};
pub use metadata::{Dimensions, ImageHeaderExtractor, MetadataError, MetadataExtractor};
pub use validation::{artifact_extension, validate_artifact_name};

use tessera_registry::RegistryError;

/// Errors produced by the chunk store and artifact lookups.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {index} of {hash} is not stored")]
    ChunkMissing { hash: String, index: u32 },

    #[error("invalid artifact name: {0}")]
    InvalidName(String),
}

/// Errors produced while merging.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("{} chunks missing", .0.len())]
    ChunksMissing(Vec<u32>),

    #[error("totalChunks mismatch: recorded {recorded}, declared {declared}")]
    Mismatch { recorded: u32, declared: u32 },

    #[error("invalid merge request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("merge task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for MergeError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(e))
    }
}
