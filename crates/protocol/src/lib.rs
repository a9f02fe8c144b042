//! Wire types shared by the Tessera upload server and its clients.
//!
//! Every HTTP response is wrapped in an [`ApiResponse`] envelope carrying a
//! numeric [`ResponseCode`] (0 = success) and a human-readable message.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::ResponseCode;
pub use envelope::ApiResponse;
pub use messages::{
    CheckRequest, CheckResponse, ChunkEntry, ChunkUploadResponse, ChunksResponse, MergeRequest,
    MergeResponse, MissingChunks,
};
pub use types::ContentHash;

/// Errors produced while validating wire values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid content hash: {0}")]
    InvalidHash(String),
}
