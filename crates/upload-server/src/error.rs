use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tessera_protocol::{ApiResponse, MissingChunks, ProtocolError, ResponseCode};
use tessera_registry::RegistryError;
use tessera_storage::{MergeError, StorageError};
use tessera_transfer::TransferError;

/// A failed request, rendered as an error envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub code: ResponseCode,
    pub message: String,
    pub data: Option<Value>,
}

impl ApiError {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::InvalidParams, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::ServerError, message)
    }

    /// 4009 carrying the sorted missing indices.
    pub fn chunks_missing(missing: Vec<u32>) -> Self {
        let message = format!("{} chunks missing", missing.len());
        Self {
            code: ResponseCode::ChunksMissing,
            message,
            data: serde_json::to_value(MissingChunks { missing }).ok(),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code.code(), "{}", self.message);
        } else {
            tracing::debug!(code = self.code.code(), "{}", self.message);
        }
        let body = match self.data {
            Some(data) => ApiResponse::error_with(self.code, self.message, data),
            None => ApiResponse::<Value>::bare(self.code, self.message),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        Self::invalid_params(e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Incomplete { missing } => Self::chunks_missing(missing),
            RegistryError::NotFound(hash) => Self::not_found(format!("no upload for {hash}")),
            e if e.is_validation() => Self::invalid_params(e.to_string()),
            e => Self::new(ResponseCode::DatabaseError, e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidName(_) => Self::not_found(e.to_string()),
            e => Self::new(ResponseCode::UploadFailed, e.to_string()),
        }
    }
}

impl From<MergeError> for ApiError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::ChunksMissing(missing) => Self::chunks_missing(missing),
            MergeError::Mismatch { .. } | MergeError::Invalid(_) => {
                Self::invalid_params(e.to_string())
            }
            MergeError::Registry(e) => e.into(),
            MergeError::Storage(e) => Self::new(ResponseCode::UploadFailed, e.to_string()),
            MergeError::Task(msg) => Self::internal(msg),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::ChecksumMismatch => Self::new(ResponseCode::ChecksumMismatch, e.to_string()),
            e => Self::internal(e.to_string()),
        }
    }
}
