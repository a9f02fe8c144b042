//! HTTP server for resumable chunked uploads.
//!
//! Exposes the dedup check, resume query, chunk upload and merge endpoints
//! under `/api/upload`, plus `/health` and static serving of finished
//! artifacts under `/uploads`. Every response is an
//! [`ApiResponse`](tessera_protocol::ApiResponse) envelope.

mod error;
mod multipart;
mod routes;
mod server;
mod state;

pub use error::ApiError;
pub use routes::router;
pub use server::{ServerConfig, UploadServer};
pub use state::AppState;

/// Errors produced by the upload server itself (not by requests).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] tessera_storage::StorageError),

    #[error(transparent)]
    Registry(#[from] tessera_registry::RegistryError),
}
