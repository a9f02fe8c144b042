use serde::{Deserialize, Serialize};

/// Prefix shared by all chunked-upload routes.
pub const UPLOAD_API_PREFIX: &str = "/api/upload";

/// Dedup ("instant upload") check.
pub const ROUTE_CHECK: &str = "/api/upload/check";

/// Resume query; `{hash}` is the content hash path parameter.
pub const ROUTE_CHUNKS: &str = "/api/upload/chunks/{hash}";

/// Single chunk upload (multipart).
pub const ROUTE_CHUNK: &str = "/api/upload/chunk";

/// Merge request.
pub const ROUTE_MERGE: &str = "/api/upload/merge";

/// Liveness probe.
pub const ROUTE_HEALTH: &str = "/health";

/// Public location of finished artifacts; `{name}` is `<hash><ext>`.
pub const ROUTE_ARTIFACTS: &str = "/uploads/{name}";

/// Default chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Largest chunk body the server accepts by default (10 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field names for a chunk upload.
pub mod fields {
    pub const HASH: &str = "hash";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const CHUNK: &str = "chunk";
    pub const FILENAME: &str = "filename";
    pub const SIZE: &str = "size";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const MIME_TYPE: &str = "mimeType";
    pub const CHECKSUM: &str = "checksum";
}

/// Status code carried in every response envelope.
///
/// `0` is success, `40xx` are client errors and `50xx` are server-side
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResponseCode {
    Success,
    NotFound,
    InvalidParams,
    ChunksMissing,
    ChecksumMismatch,
    ServerError,
    DatabaseError,
    UploadFailed,
}

impl ResponseCode {
    /// Numeric value sent on the wire.
    pub fn code(self) -> i32 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::NotFound => 4005,
            ResponseCode::InvalidParams => 4006,
            ResponseCode::ChunksMissing => 4009,
            ResponseCode::ChecksumMismatch => 4010,
            ResponseCode::ServerError => 5001,
            ResponseCode::DatabaseError => 5002,
            ResponseCode::UploadFailed => 5003,
        }
    }

    /// Parses a wire value. Unknown codes return `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ResponseCode::Success,
            4005 => ResponseCode::NotFound,
            4006 => ResponseCode::InvalidParams,
            4009 => ResponseCode::ChunksMissing,
            4010 => ResponseCode::ChecksumMismatch,
            5001 => ResponseCode::ServerError,
            5002 => ResponseCode::DatabaseError,
            5003 => ResponseCode::UploadFailed,
            _ => return None,
        })
    }

    /// HTTP status the server pairs with this code.
    pub fn http_status(self) -> u16 {
        match self {
            ResponseCode::Success => 200,
            ResponseCode::NotFound => 404,
            ResponseCode::InvalidParams | ResponseCode::ChecksumMismatch => 400,
            ResponseCode::ChunksMissing => 409,
            ResponseCode::ServerError
            | ResponseCode::DatabaseError
            | ResponseCode::UploadFailed => 500,
        }
    }

    /// Whether a client may reasonably retry the same request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ResponseCode::ServerError
                | ResponseCode::DatabaseError
                | ResponseCode::UploadFailed
                | ResponseCode::ChecksumMismatch
        )
    }
}

impl From<ResponseCode> for i32 {
    fn from(code: ResponseCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ResponseCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ResponseCode::from_code(value).ok_or_else(|| format!("unknown response code {value}"))
    }
}
