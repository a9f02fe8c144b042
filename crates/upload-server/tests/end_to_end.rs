mod common;

use std::sync::Arc;

use common::{TestServer, test_bytes};
use tessera_protocol::{CheckRequest, MergeRequest};
use tessera_transfer::{ChunkPlan, checksum_bytes, content_hash_bytes};
use tessera_uploader::{
    ChunkUpload, HttpUploadApi, RetryPolicy, UploadApi, UploadConfig, UploadCoordinator,
    UploadError, UploadOutcome,
};

const MB: usize = 1024 * 1024;

fn chunk(data: &[u8], plan: &ChunkPlan, hash: &tessera_protocol::ContentHash, index: u32) -> ChunkUpload {
    let range = plan.range(index).unwrap();
    let bytes = data[range.start as usize..range.end as usize].to_vec();
    ChunkUpload {
        hash: hash.clone(),
        index,
        checksum: checksum_bytes(&bytes),
        data: bytes,
        filename: "photo.jpg".into(),
        size: data.len() as u64,
        total_chunks: plan.count(),
        mime_type: Some("image/jpeg".into()),
    }
}

#[tokio::test]
async fn reverse_order_upload_with_resume() {
    let server = TestServer::start(true).await;
    let api = HttpUploadApi::new(&server.base_url()).unwrap();

    let data = test_bytes(10 * MB);
    let hash = content_hash_bytes(&data).unwrap();
    let plan = ChunkPlan::new(data.len() as u64, 2 * MB).unwrap();
    assert_eq!(plan.count(), 5);

    let check = CheckRequest {
        hash: hash.to_string(),
        filename: "photo.jpg".into(),
        size: data.len() as u64,
    };
    assert!(!api.check(&check).await.unwrap().exists);

    // Interrupted after the last two chunks.
    for index in [4, 3] {
        api.upload_chunk(chunk(&data, &plan, &hash, index)).await.unwrap();
    }
    assert_eq!(api.uploaded_chunks(&hash).await.unwrap(), vec![3, 4]);

    for index in [2, 1, 0] {
        api.upload_chunk(chunk(&data, &plan, &hash, index)).await.unwrap();
    }

    let merged = api
        .merge(&MergeRequest {
            hash: hash.to_string(),
            filename: "photo.jpg".into(),
            total_chunks: 5,
        })
        .await
        .unwrap();
    assert_eq!(merged.url, format!("/uploads/{hash}.jpg"));

    let artifact = reqwest::get(server.url(&merged.url))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(artifact.len(), data.len());
    assert_eq!(content_hash_bytes(&artifact).unwrap(), hash);

    let again = api.check(&check).await.unwrap();
    assert!(again.exists);
    assert_eq!(again.url.as_deref(), Some(merged.url.as_str()));
}

#[tokio::test]
async fn merge_with_gap_reports_missing() {
    let server = TestServer::start(false).await;
    let api = HttpUploadApi::new(&server.base_url()).unwrap();

    let data = test_bytes(4096);
    let hash = content_hash_bytes(&data).unwrap();
    let plan = ChunkPlan::new(data.len() as u64, 1024).unwrap();
    for index in [0, 1, 3] {
        api.upload_chunk(chunk(&data, &plan, &hash, index)).await.unwrap();
    }

    let err = api
        .merge(&MergeRequest {
            hash: hash.to_string(),
            filename: "photo.jpg".into(),
            total_chunks: 4,
        })
        .await
        .unwrap_err();
    match err {
        UploadError::MissingChunks(missing) => assert_eq!(missing, vec![2]),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn coordinator_uploads_then_dedups() {
    let server = TestServer::start(true).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    let data = test_bytes(3 * MB + 123);
    std::fs::write(&path, &data).unwrap();

    let api = Arc::new(HttpUploadApi::new(&server.base_url()).unwrap());
    let config = UploadConfig {
        chunk_size: MB,
        retry: RetryPolicy::immediate(2),
        ..Default::default()
    };

    let coord = UploadCoordinator::new(Arc::clone(&api), config.clone());
    let first = coord.upload(&path).await.unwrap();
    let url = match &first {
        UploadOutcome::Uploaded {
            url, chunks_sent, ..
        } => {
            assert_eq!(*chunks_sent, 4);
            url.clone()
        }
        other => panic!("unexpected: {other:?}"),
    };

    let second = UploadCoordinator::new(api, config).upload(&path).await.unwrap();
    assert_eq!(
        second,
        UploadOutcome::Instant {
            hash: content_hash_bytes(&data).unwrap(),
            url
        }
    );
}

#[tokio::test]
async fn coordinator_resumes_partial_upload() {
    let server = TestServer::start(true).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.bin");
    let data = test_bytes(5 * 1000);
    std::fs::write(&path, &data).unwrap();

    let api = Arc::new(HttpUploadApi::new(&server.base_url()).unwrap());
    let hash = content_hash_bytes(&data).unwrap();
    let plan = ChunkPlan::new(data.len() as u64, 1000).unwrap();
    for index in [1, 4] {
        let mut c = chunk(&data, &plan, &hash, index);
        c.filename = "clip.bin".into();
        api.upload_chunk(c).await.unwrap();
    }

    let config = UploadConfig {
        chunk_size: 1000,
        ..Default::default()
    };
    let outcome = UploadCoordinator::new(Arc::clone(&api), config)
        .upload(&path)
        .await
        .unwrap();
    match outcome {
        UploadOutcome::Uploaded {
            chunks_sent, url, ..
        } => {
            assert_eq!(chunks_sent, 3);
            assert_eq!(url, format!("/uploads/{hash}.bin"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}
