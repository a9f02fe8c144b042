//! File registry: the authoritative record of every upload.
//!
//! A [`FileRecord`] is keyed by content hash and tracks which chunk indices
//! have been accepted, plus the lifecycle state (`Uploading` until merged,
//! then `Completed` with the public URL). Two backends implement
//! [`FileRegistry`]:
//!
//! - [`MemoryRegistry`]: process-local, all mutations under one write lock.
//! - [`SqliteRegistry`]: durable, chunk membership is a keyed table so adding
//!   an index is a single `INSERT OR IGNORE`.

mod memory;
mod record;
mod sqlite;

use std::collections::BTreeSet;

use tessera_protocol::ContentHash;

pub use memory::MemoryRegistry;
pub use record::{ChunkMeta, FileRecord, FileState};
pub use sqlite::SqliteRegistry;

/// Errors produced by registry backends.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no upload recorded for {0}")]
    NotFound(ContentHash),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("{field} mismatch: recorded {recorded}, declared {declared}")]
    Mismatch {
        field: &'static str,
        recorded: u64,
        declared: u64,
    },

    #[error("upload incomplete, {} chunks missing", missing.len())]
    Incomplete { missing: Vec<u32> },

    #[error("invalid upload metadata: {0}")]
    InvalidMeta(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt record for {hash}: {reason}")]
    Corrupt { hash: String, reason: String },

    #[error("registry lock poisoned")]
    Poisoned,
}

impl RegistryError {
    /// True for errors caused by the request rather than the backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfRange { .. } | Self::Mismatch { .. } | Self::InvalidMeta(_)
        )
    }
}

/// Result of a dedup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsResult {
    pub exists: bool,
    pub url: Option<String>,
}

impl ExistsResult {
    fn from_record(record: Option<&FileRecord>) -> Self {
        match record.and_then(FileRecord::url) {
            Some(url) => Self {
                exists: true,
                url: Some(url.to_string()),
            },
            None => Self {
                exists: false,
                url: None,
            },
        }
    }
}

/// Outcome of registering one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyPresent,
}

/// Storage of per-file upload state.
///
/// Every method is atomic with respect to concurrent callers on the same
/// hash: two concurrent `register_chunk` calls for different indices both
/// end up in the uploaded set.
pub trait FileRegistry: Send + Sync {
    /// Reports whether a completed file with `hash` exists.
    ///
    /// `filename` and `size` are informational only.
    fn check_exists(
        &self,
        hash: &ContentHash,
        filename: &str,
        size: u64,
    ) -> Result<ExistsResult, RegistryError>;

    /// Accepted chunk indices; empty for an unknown hash.
    fn uploaded_chunks(&self, hash: &ContentHash) -> Result<BTreeSet<u32>, RegistryError>;

    /// Records chunk `index`, creating the record from `meta` if absent.
    fn register_chunk(
        &self,
        hash: &ContentHash,
        index: u32,
        meta: &ChunkMeta,
    ) -> Result<RegisterOutcome, RegistryError>;

    /// Transitions the record to `Completed` and returns its URL.
    ///
    /// Already-completed records keep their stored URL.
    fn mark_completed(&self, hash: &ContentHash, url: &str) -> Result<String, RegistryError>;

    /// Full record snapshot.
    fn get(&self, hash: &ContentHash) -> Result<Option<FileRecord>, RegistryError>;
}
