use std::future::Future;
use std::pin::Pin;

use tessera_protocol::{CheckRequest, CheckResponse, ContentHash, MergeRequest, MergeResponse};

use crate::UploadError;

/// Boxed future returned by [`UploadApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// One chunk and the file metadata sent with it.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub hash: ContentHash,
    pub index: u32,
    pub data: Vec<u8>,
    pub filename: String,
    pub size: u64,
    pub total_chunks: u32,
    pub mime_type: Option<String>,
    /// SHA-256 hex of `data`.
    pub checksum: String,
}

/// The four server operations an upload needs.
///
/// Keeps the coordinator independent of the transport; tests drive it with
/// an in-memory implementation.
pub trait UploadApi: Send + Sync {
    fn check(&self, req: &CheckRequest) -> ApiFuture<'_, CheckResponse>;

    /// Indices the server has already accepted for `hash`.
    fn uploaded_chunks(&self, hash: &ContentHash) -> ApiFuture<'_, Vec<u32>>;

    fn upload_chunk(&self, chunk: ChunkUpload) -> ApiFuture<'_, ()>;

    /// Fails with [`UploadError::MissingChunks`] when the server lacks chunks.
    fn merge(&self, req: &MergeRequest) -> ApiFuture<'_, MergeResponse>;
}
