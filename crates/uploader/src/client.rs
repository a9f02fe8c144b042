//! `reqwest` implementation of [`UploadApi`].

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tessera_protocol::constants::{
    ROUTE_CHECK, ROUTE_CHUNK, ROUTE_CHUNKS, ROUTE_MERGE, fields,
};
use tessera_protocol::{
    ApiResponse, CheckRequest, CheckResponse, ChunksResponse, ContentHash, MergeRequest,
    MergeResponse, MissingChunks, ResponseCode,
};

use crate::{ApiFuture, ChunkUpload, UploadApi, UploadError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for the upload API.
#[derive(Clone)]
pub struct HttpUploadApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUploadApi {
    /// Creates a client for the server at `base_url` (e.g. `http://host:3000`).
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }
}

/// Unwraps an envelope, turning non-zero codes into errors.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UploadError> {
    let status = resp.status();
    let body = resp.bytes().await?;

    let envelope: ApiResponse<Value> = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            // Not one of ours (proxy page, body limit rejection, ...).
            let code = if status.is_server_error() {
                ResponseCode::ServerError
            } else {
                ResponseCode::InvalidParams
            };
            return Err(UploadError::Api {
                code: code.code(),
                message: format!("HTTP {status}: {}", String::from_utf8_lossy(&body)),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if envelope.response_code() == Some(ResponseCode::ChunksMissing) {
        let missing: MissingChunks = match envelope.data {
            Some(data) => serde_json::from_value(data)?,
            None => MissingChunks::default(),
        };
        return Err(UploadError::MissingChunks(missing.missing));
    }
    if !envelope.is_success() {
        return Err(UploadError::Api {
            code: envelope.code,
            message: envelope.message,
        });
    }

    let data = envelope.data.unwrap_or(Value::Null);
    Ok(serde_json::from_value(data)?)
}

impl UploadApi for HttpUploadApi {
    fn check(&self, req: &CheckRequest) -> ApiFuture<'_, CheckResponse> {
        let request = self.http.post(self.url(ROUTE_CHECK)).json(req);
        Box::pin(async move { decode(request.send().await?).await })
    }

    fn uploaded_chunks(&self, hash: &ContentHash) -> ApiFuture<'_, Vec<u32>> {
        let route = ROUTE_CHUNKS.replace("{hash}", hash.as_str());
        let request = self.http.get(self.url(&route));
        Box::pin(async move {
            let resp: ChunksResponse = decode(request.send().await?).await?;
            Ok(resp.indices())
        })
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let part = Part::bytes(chunk.data)
                .file_name(format!("{}-{}", chunk.hash, chunk.index))
                .mime_str("application/octet-stream")?;
            let mut form = Form::new()
                .text(fields::HASH, chunk.hash.to_string())
                .text(fields::CHUNK_INDEX, chunk.index.to_string())
                .text(fields::FILENAME, chunk.filename)
                .text(fields::SIZE, chunk.size.to_string())
                .text(fields::TOTAL_CHUNKS, chunk.total_chunks.to_string())
                .text(fields::CHECKSUM, chunk.checksum);
            if let Some(mime) = chunk.mime_type {
                form = form.text(fields::MIME_TYPE, mime);
            }
            // Binary part last so the text fields are parsed first.
            form = form.part(fields::CHUNK, part);

            let resp = self
                .http
                .post(self.url(ROUTE_CHUNK))
                .multipart(form)
                .send()
                .await?;
            let _: Value = decode(resp).await?;
            Ok(())
        })
    }

    fn merge(&self, req: &MergeRequest) -> ApiFuture<'_, MergeResponse> {
        let request = self.http.post(self.url(ROUTE_MERGE)).json(req);
        Box::pin(async move { decode(request.send().await?).await })
    }
}
