//! Client side of a resumable chunked upload.
//!
//! [`UploadCoordinator`] drives one file through dedup check, resume query,
//! bounded-concurrency chunk dispatch with per-chunk retries, and merge. It
//! talks to the server through the [`UploadApi`] trait; [`HttpUploadApi`] is
//! the `reqwest` implementation.

mod api;
mod client;
mod coordinator;
mod error;
mod retry;

pub use api::{ApiFuture, ChunkUpload, UploadApi};
pub use client::HttpUploadApi;
pub use coordinator::{
    DEFAULT_CONCURRENCY, UploadConfig, UploadCoordinator, UploadEvent, UploadOutcome,
};
pub use error::UploadError;
pub use retry::RetryPolicy;
