use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tessera_protocol::ContentHash;

use crate::{RegisterOutcome, RegistryError};

/// Lifecycle of an upload. Only `Uploading -> Completed` is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Uploading,
    Completed { url: String },
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Metadata sent alongside every chunk. The first accepted chunk for a hash
/// creates the record from it; later chunks must agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub filename: String,
    pub size: u64,
    pub total_chunks: u32,
    pub mime_type: Option<String>,
}

impl ChunkMeta {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.filename.trim().is_empty() {
            return Err(RegistryError::InvalidMeta("filename is empty".into()));
        }
        if self.size == 0 {
            return Err(RegistryError::InvalidMeta("size must be positive".into()));
        }
        if self.total_chunks == 0 {
            return Err(RegistryError::InvalidMeta(
                "totalChunks must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Checks `index` against the declared chunk count.
    pub fn check_index(&self, index: u32) -> Result<(), RegistryError> {
        if index >= self.total_chunks {
            return Err(RegistryError::IndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        Ok(())
    }
}

/// Everything the server knows about one uploaded (or uploading) file.
///
/// The chunk set and state change only through [`FileRecord::add_chunk`]
/// and [`FileRecord::complete`]:
///
/// ```compile_fail
/// use tessera_registry::{FileRecord, FileState};
///
/// fn force(rec: &mut FileRecord) {
///     rec.state = FileState::Completed { url: "/uploads/x".into() };
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub hash: ContentHash,
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub total_chunks: u32,
    pub(crate) uploaded: BTreeSet<u32>,
    pub(crate) state: FileState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// New `Uploading` record with no chunks.
    pub fn new(hash: ContentHash, meta: &ChunkMeta) -> Self {
        let now = Utc::now();
        Self {
            hash,
            filename: meta.filename.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
            total_chunks: meta.total_chunks,
            uploaded: BTreeSet::new(),
            state: FileState::Uploading,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> &FileState {
        &self.state
    }

    /// Accepted chunk indices, ascending.
    pub fn uploaded(&self) -> &BTreeSet<u32> {
        &self.uploaded
    }

    /// Public URL, present only once completed.
    pub fn url(&self) -> Option<&str> {
        match &self.state {
            FileState::Completed { url } => Some(url),
            FileState::Uploading => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, FileState::Completed { .. })
    }

    /// Indices in `[0, total_chunks)` not yet accepted, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        missing_indices(self.total_chunks, &self.uploaded)
    }

    /// Rejects metadata that disagrees with what was first recorded.
    pub fn check_meta(&self, meta: &ChunkMeta) -> Result<(), RegistryError> {
        check_recorded(self.total_chunks, self.size, meta)
    }

    /// Adds `index` to the uploaded set.
    pub fn add_chunk(&mut self, index: u32) -> Result<RegisterOutcome, RegistryError> {
        if index >= self.total_chunks {
            return Err(RegistryError::IndexOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        if self.uploaded.insert(index) {
            self.updated_at = Utc::now();
            Ok(RegisterOutcome::Added)
        } else {
            Ok(RegisterOutcome::AlreadyPresent)
        }
    }

    /// Guarded `Uploading -> Completed` transition.
    ///
    /// Returns the effective URL; a completed record keeps its first one.
    pub fn complete(&mut self, url: &str) -> Result<String, RegistryError> {
        if let FileState::Completed { url } = &self.state {
            return Ok(url.clone());
        }
        let missing = self.missing_chunks();
        if !missing.is_empty() {
            return Err(RegistryError::Incomplete { missing });
        }
        self.state = FileState::Completed {
            url: url.to_string(),
        };
        self.updated_at = Utc::now();
        Ok(url.to_string())
    }
}

pub(crate) fn missing_indices(total: u32, uploaded: &BTreeSet<u32>) -> Vec<u32> {
    (0..total).filter(|i| !uploaded.contains(i)).collect()
}

pub(crate) fn check_recorded(
    total_chunks: u32,
    size: u64,
    meta: &ChunkMeta,
) -> Result<(), RegistryError> {
    if meta.total_chunks != total_chunks {
        return Err(RegistryError::Mismatch {
            field: "totalChunks",
            recorded: u64::from(total_chunks),
            declared: u64::from(meta.total_chunks),
        });
    }
    if meta.size != size {
        return Err(RegistryError::Mismatch {
            field: "size",
            recorded: size,
            declared: meta.size,
        });
    }
    Ok(())
}
