use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::Value;
use tessera_protocol::constants::{
    ROUTE_ARTIFACTS, ROUTE_CHECK, ROUTE_CHUNK, ROUTE_CHUNKS, ROUTE_HEALTH, ROUTE_MERGE,
};
use tessera_protocol::{
    ApiResponse, CheckRequest, CheckResponse, ChunkUploadResponse, ChunksResponse, ContentHash,
    MergeRequest, MergeResponse, ResponseCode,
};
use tessera_registry::{FileRecord, RegisterOutcome};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::multipart::{ChunkForm, read_chunk_form};
use crate::{ApiError, AppState};

/// Room for the non-chunk multipart fields and boundaries.
const FORM_OVERHEAD: usize = 64 * 1024;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Builds the full HTTP router.
///
/// Chunk bodies above `max_chunk_bytes` are rejected before reaching the
/// handler.
pub fn router(state: AppState, max_chunk_bytes: usize) -> Router {
    Router::new()
        .route(ROUTE_CHECK, post(check))
        .route(ROUTE_CHUNKS, get(chunks))
        .route(
            ROUTE_CHUNK,
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes + FORM_OVERHEAD)),
        )
        .route(ROUTE_MERGE, post(merge))
        .route(ROUTE_HEALTH, get(health))
        .route(ROUTE_ARTIFACTS, get(artifact))
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(req: Request, next: Next) -> Response {
    debug!(method = %req.method(), path = %req.uri().path(), "request");
    next.run(req).await
}

/// Runs blocking registry or store work off the async executor.
async fn blocking<T, E>(f: impl FnOnce() -> Result<T, E> + Send + 'static) -> Result<T, ApiError>
where
    T: Send + 'static,
    E: Send + 'static,
    ApiError: From<E>,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::invalid_params(e.body_text()))
}

async fn health() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::bare(ResponseCode::Success, "OK"))
}

async fn not_found() -> ApiError {
    ApiError::not_found("resource not found")
}

async fn check(
    State(state): State<AppState>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> ApiResult<CheckResponse> {
    let req = parse_json(payload)?;
    let hash = ContentHash::parse(&req.hash)?;
    if req.filename.trim().is_empty() {
        return Err(ApiError::invalid_params("filename is required"));
    }

    let registry = state.registry.clone();
    let result =
        blocking(move || registry.check_exists(&hash, &req.filename, req.size)).await?;

    let data = match result.url {
        Some(url) if result.exists => CheckResponse::found(url),
        _ => CheckResponse::missing(),
    };
    let message = if data.exists { "file exists" } else { "file not found" };
    Ok(Json(ApiResponse::ok(message, data)))
}

async fn chunks(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<ChunksResponse> {
    let hash = ContentHash::parse(&hash)?;
    let registry = state.registry.clone();
    let uploaded = blocking(move || registry.uploaded_chunks(&hash)).await?;
    Ok(Json(ApiResponse::ok(
        "ok",
        ChunksResponse::from_indices(uploaded),
    )))
}

async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ChunkUploadResponse> {
    let ChunkForm {
        hash,
        index,
        data,
        meta,
        checksum,
    } = read_chunk_form(multipart).await?;

    if let Some(expected) = &checksum {
        tessera_transfer::verify_checksum(&data, expected)?;
    }

    // Until the record exists, its creating request holds the hash's stripe
    // so a conflicting request can never overwrite the stored bytes.
    let mut existing = lookup(&state, &hash).await?;
    let _creating = if existing.is_none() {
        let guard = state.creation_locks.lock(&hash).await;
        existing = lookup(&state, &hash).await?;
        Some(guard)
    } else {
        None
    };

    // Reject metadata conflicts before touching stored bytes.
    if let Some(record) = &existing {
        record.check_meta(&meta)?;
        if record.is_completed() {
            debug!(hash = %hash, index, "chunk for completed upload ignored");
            return Ok(Json(ApiResponse::ok(
                "chunk already uploaded",
                ChunkUploadResponse { chunk_index: index },
            )));
        }
    }

    // Bytes are durable before the index becomes visible to resume or merge.
    let store = state.store.clone();
    let (h, bytes) = (hash.clone(), data);
    blocking(move || store.put(&h, index, &bytes)).await?;

    let registry = state.registry.clone();
    let h = hash.clone();
    let outcome = blocking(move || registry.register_chunk(&h, index, &meta)).await?;
    debug!(hash = %hash, index, ?outcome, "chunk accepted");

    let message = match outcome {
        RegisterOutcome::Added => "chunk uploaded",
        RegisterOutcome::AlreadyPresent => "chunk already uploaded",
    };
    Ok(Json(ApiResponse::ok(
        message,
        ChunkUploadResponse { chunk_index: index },
    )))
}

async fn lookup(state: &AppState, hash: &ContentHash) -> Result<Option<FileRecord>, ApiError> {
    let registry = state.registry.clone();
    let hash = hash.clone();
    blocking(move || registry.get(&hash)).await
}

async fn merge(
    State(state): State<AppState>,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<MergeResponse> {
    let req = parse_json(payload)?;
    let hash = ContentHash::parse(&req.hash)?;
    if req.total_chunks == 0 {
        return Err(ApiError::invalid_params("totalChunks must be positive"));
    }

    let out = state
        .assembler
        .merge(&hash, &req.filename, req.total_chunks)
        .await?;
    info!(hash = %hash, url = %out.url, "merge complete");

    Ok(Json(ApiResponse::ok(
        "merge complete",
        MergeResponse {
            url: out.url,
            width: out.dimensions.map(|d| d.width),
            height: out.dimensions.map(|d| d.height),
        },
    )))
}

async fn artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.assembler.artifact_path(&name)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("{name} not found")));
        }
        Err(e) => return Err(ApiError::from(tessera_storage::StorageError::Io(e))),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::from(tessera_storage::StorageError::Io(e)))?
        .len();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
