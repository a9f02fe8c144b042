use tessera_protocol::ResponseCode;

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server error {code}: {message}")]
    Api { code: i32, message: String },

    #[error("server is missing chunks {0:?}")]
    MissingChunks(Vec<u32>),

    #[error("chunk {index} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        index: u32,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("file is empty")]
    EmptyFile,

    #[error("cancelled")]
    Cancelled,

    #[error("upload task failed: {0}")]
    Task(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] tessera_transfer::TransferError),
}

impl UploadError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Api { code, .. } => {
                ResponseCode::from_code(*code).is_some_and(ResponseCode::is_retryable)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_failures_are_retryable() {
        let e = UploadError::Api {
            code: 5003,
            message: "disk".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn validation_failures_are_not() {
        let e = UploadError::Api {
            code: 4006,
            message: "bad".into(),
        };
        assert!(!e.is_retryable());
        assert!(!UploadError::MissingChunks(vec![1]).is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
    }

    #[test]
    fn chunk_failure_names_index() {
        let e = UploadError::ChunkFailed {
            index: 4,
            attempts: 3,
            source: Box::new(UploadError::Api {
                code: 5001,
                message: "boom".into(),
            }),
        };
        assert!(e.to_string().contains("chunk 4"));
    }
}
