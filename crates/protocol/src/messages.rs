use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Dedup check: does a completed file with this content hash already exist?
///
/// `filename` and `size` are informational; the dedup key is the hash alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub hash: String,
    pub filename: String,
    pub size: u64,
}

/// Asks the server to assemble all chunks of `hash` into the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub hash: String,
    pub filename: String,
    pub total_chunks: u32,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of a dedup check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CheckResponse {
    /// A completed file with the hash exists at `url`.
    pub fn found(url: impl Into<String>) -> Self {
        Self {
            exists: true,
            url: Some(url.into()),
        }
    }

    /// No completed file with the hash.
    pub fn missing() -> Self {
        Self {
            exists: false,
            url: None,
        }
    }
}

/// One accepted chunk in a resume query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub chunk_index: u32,
}

/// Accepted chunk indices for a hash (empty when unknown).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunksResponse {
    pub chunks: Vec<ChunkEntry>,
}

impl ChunksResponse {
    /// Builds a response from indices in any order; output is ascending.
    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut chunks: Vec<ChunkEntry> = indices
            .into_iter()
            .map(|chunk_index| ChunkEntry { chunk_index })
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks.dedup();
        Self { chunks }
    }

    /// Returns the indices as a plain vector.
    pub fn indices(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.chunk_index).collect()
    }
}

/// Acknowledgement of one chunk upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub chunk_index: u32,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Error details attached to a failed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingChunks {
    pub missing: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_request_uses_camel_case() {
        let json = r#"{"hash":"abc","filename":"photo.jpg","size":10}"#;
        let req: CheckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.filename, "photo.jpg");
        assert_eq!(req.size, 10);
    }

    #[test]
    fn check_request_requires_all_fields() {
        let json = r#"{"hash":"abc","filename":"photo.jpg"}"#;
        assert!(serde_json::from_str::<CheckRequest>(json).is_err());
    }

    #[test]
    fn merge_request_field_names() {
        let req = MergeRequest {
            hash: "h".into(),
            filename: "f.bin".into(),
            total_chunks: 5,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["totalChunks"], 5);
    }

    #[test]
    fn check_response_omits_absent_url() {
        let json = serde_json::to_string(&CheckResponse::missing()).unwrap();
        assert_eq!(json, r#"{"exists":false}"#);
    }

    #[test]
    fn chunks_response_sorted_and_unique() {
        let resp = ChunksResponse::from_indices([4, 3, 4, 0]);
        assert_eq!(resp.indices(), vec![0, 3, 4]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["chunks"][0]["chunkIndex"], 0);
    }

    #[test]
    fn merge_response_omits_missing_dimensions() {
        let resp = MergeResponse {
            url: "/uploads/x.bin".into(),
            width: None,
            height: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("width"));
        assert!(!json.contains("height"));
    }
}
