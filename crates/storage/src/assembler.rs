use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_protocol::ContentHash;
use tessera_registry::{FileRegistry, RegistryError};
use tracing::{debug, info, warn};

use crate::metadata::{Dimensions, ImageHeaderExtractor, MetadataExtractor};
use crate::validation::{artifact_extension, validate_artifact_name};
use crate::{ChunkStore, MergeError, StorageError};

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub url: String,
    pub dimensions: Option<Dimensions>,
}

/// Concatenates stored chunks into the final artifact.
pub struct MergeAssembler {
    registry: Arc<dyn FileRegistry>,
    store: Arc<dyn ChunkStore>,
    artifact_dir: PathBuf,
    public_base_url: String,
    extractor: Arc<dyn MetadataExtractor>,
    cleanup_chunks: bool,
}

impl MergeAssembler {
    /// Creates an assembler writing into `artifact_dir`.
    ///
    /// Artifacts are published as `<public_base_url>/<hash><ext>`.
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        store: Arc<dyn ChunkStore>,
        artifact_dir: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let artifact_dir = artifact_dir.into();
        let public_base_url: String = public_base_url.into();
        std::fs::create_dir_all(&artifact_dir)?;
        Ok(Self {
            registry,
            store,
            artifact_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            extractor: Arc::new(ImageHeaderExtractor),
            cleanup_chunks: false,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Deletes stored chunks once the artifact is published.
    pub fn with_cleanup(mut self, cleanup_chunks: bool) -> Self {
        self.cleanup_chunks = cleanup_chunks;
        self
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Resolves a published artifact name to its path on disk.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_artifact_name(name)?;
        Ok(self.artifact_dir.join(name))
    }

    /// Assembles the artifact for `hash` and marks the upload completed.
    pub async fn merge(
        self: &Arc<Self>,
        hash: &ContentHash,
        filename: &str,
        total_chunks: u32,
    ) -> Result<MergeOutput, MergeError> {
        let this = Arc::clone(self);
        let hash = hash.clone();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || this.merge_blocking(&hash, &filename, total_chunks))
            .await
            .map_err(|e| MergeError::Task(e.to_string()))?
    }

    fn merge_blocking(
        &self,
        hash: &ContentHash,
        filename: &str,
        total_chunks: u32,
    ) -> Result<MergeOutput, MergeError> {
        if total_chunks == 0 {
            return Err(MergeError::Invalid("totalChunks must be positive".into()));
        }

        // One snapshot drives both the completeness check and the ordering.
        let Some(record) = self.registry.get(hash)? else {
            return Err(MergeError::ChunksMissing((0..total_chunks).collect()));
        };
        if record.total_chunks != total_chunks {
            return Err(MergeError::Mismatch {
                recorded: record.total_chunks,
                declared: total_chunks,
            });
        }
        let missing = record.missing_chunks();
        if !missing.is_empty() {
            debug!(hash = %hash, missing = missing.len(), "merge refused");
            return Err(MergeError::ChunksMissing(missing));
        }
        if record.filename != filename {
            debug!(hash = %hash, recorded = %record.filename, declared = filename,
                "merge filename differs from recorded, using recorded");
        }

        let name = format!("{hash}{}", artifact_extension(&record.filename));
        let final_path = self.artifact_dir.join(&name);

        // Chunks may already be cleaned up; a published artifact is final.
        if let Some(url) = record.url()
            && final_path.exists()
        {
            debug!(hash = %hash, url, "already merged");
            return Ok(MergeOutput {
                url: url.to_string(),
                dimensions: self.dimensions(hash, &final_path),
            });
        }

        self.write_artifact(hash, total_chunks, &final_path)?;
        let dimensions = self.dimensions(hash, &final_path);

        let url = format!("{}/{name}", self.public_base_url);
        let url = match self.registry.mark_completed(hash, &url) {
            Ok(url) => url,
            Err(RegistryError::Incomplete { missing }) => {
                return Err(MergeError::ChunksMissing(missing));
            }
            Err(e) => return Err(e.into()),
        };
        info!(hash = %hash, chunks = total_chunks, url = %url, "upload merged");

        if self.cleanup_chunks {
            if let Err(e) = self.store.remove_all(hash) {
                warn!(hash = %hash, "chunk cleanup failed: {e}");
            }
        }

        Ok(MergeOutput { url, dimensions })
    }

    fn dimensions(&self, hash: &ContentHash, path: &Path) -> Option<Dimensions> {
        match self.extractor.extract(path) {
            Ok(d) => d,
            Err(e) => {
                warn!(hash = %hash, "metadata extraction failed: {e}");
                None
            }
        }
    }

    /// Streams chunks `0..total_chunks` into a temp file, then renames it.
    fn write_artifact(
        &self,
        hash: &ContentHash,
        total_chunks: u32,
        final_path: &Path,
    ) -> Result<(), MergeError> {
        let part = self
            .artifact_dir
            .join(format!(".{hash}.{}.part", uuid::Uuid::new_v4()));

        let result = (|| -> Result<(), MergeError> {
            let mut out = BufWriter::new(std::fs::File::create(&part)?);
            for index in 0..total_chunks {
                let data = self.store.get(hash, index)?;
                out.write_all(&data)?;
            }
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            std::fs::rename(&part, final_path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&part);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiskChunkStore;
    use tessera_registry::{ChunkMeta, FileState, MemoryRegistry};
    use tempfile::TempDir;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    struct Fixture {
        _tmp: TempDir,
        registry: Arc<MemoryRegistry>,
        store: Arc<DiskChunkStore>,
        assembler: Arc<MergeAssembler>,
    }

    fn fixture(cleanup: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let store = Arc::new(DiskChunkStore::new(tmp.path().join("chunks")).unwrap());
        let assembler = Arc::new(
            MergeAssembler::new(
                registry.clone(),
                store.clone(),
                tmp.path().join("files"),
                "/uploads/",
            )
            .unwrap()
            .with_cleanup(cleanup),
        );
        Fixture {
            _tmp: tmp,
            registry,
            store,
            assembler,
        }
    }

    fn hash() -> ContentHash {
        ContentHash::parse(HASH).unwrap()
    }

    fn meta(total: u32) -> ChunkMeta {
        ChunkMeta {
            filename: "notes.TXT".into(),
            size: u64::from(total) * 2,
            total_chunks: total,
            mime_type: None,
        }
    }

    fn upload(f: &Fixture, indices: &[u32], total: u32) {
        for &i in indices {
            let data = [b'a' + i as u8; 2];
            f.store.put(&hash(), i, &data).unwrap();
            f.registry.register_chunk(&hash(), i, &meta(total)).unwrap();
        }
    }

    #[tokio::test]
    async fn merges_in_index_order() {
        let f = fixture(false);
        upload(&f, &[3, 1, 0, 2], 4);

        let out = f.assembler.merge(&hash(), "notes.TXT", 4).await.unwrap();
        assert_eq!(out.url, format!("/uploads/{HASH}.txt"));
        assert_eq!(out.dimensions, None);

        let path = f.assembler.artifact_path(&format!("{HASH}.txt")).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"aabbccdd");
        assert!(matches!(
            f.registry.get(&hash()).unwrap().unwrap().state(),
            FileState::Completed { .. }
        ));
        // Chunks kept by default.
        assert!(f.store.get(&hash(), 0).is_ok());
    }

    #[tokio::test]
    async fn reports_missing_chunks() {
        let f = fixture(false);
        upload(&f, &[0, 1, 3], 4);
        match f.assembler.merge(&hash(), "notes.TXT", 4).await {
            Err(MergeError::ChunksMissing(missing)) => assert_eq!(missing, vec![2]),
            other => panic!("unexpected: {other:?}"),
        }
        let rec = f.registry.get(&hash()).unwrap().unwrap();
        assert_eq!(rec.state(), &FileState::Uploading);
    }

    #[tokio::test]
    async fn unknown_hash_misses_everything() {
        let f = fixture(false);
        match f.assembler.merge(&hash(), "x.bin", 3).await {
            Err(MergeError::ChunksMissing(missing)) => assert_eq!(missing, vec![0, 1, 2]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_mismatched_total() {
        let f = fixture(false);
        upload(&f, &[0, 1], 2);
        assert!(matches!(
            f.assembler.merge(&hash(), "notes.TXT", 3).await,
            Err(MergeError::Mismatch {
                recorded: 2,
                declared: 3
            })
        ));
        assert!(matches!(
            f.assembler.merge(&hash(), "notes.TXT", 0).await,
            Err(MergeError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn remerge_is_deterministic() {
        let f = fixture(false);
        upload(&f, &[0, 1, 2], 3);
        let first = f.assembler.merge(&hash(), "notes.TXT", 3).await.unwrap();
        let path = f.assembler.artifact_path(&format!("{HASH}.txt")).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let second = f.assembler.merge(&hash(), "renamed.md", 3).await.unwrap();
        assert_eq!(first.url, second.url);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn cleanup_removes_chunks() {
        let f = fixture(true);
        upload(&f, &[0, 1], 2);
        f.assembler.merge(&hash(), "notes.TXT", 2).await.unwrap();
        assert!(matches!(
            f.store.get(&hash(), 0),
            Err(StorageError::ChunkMissing { .. })
        ));
    }

    #[tokio::test]
    async fn remerge_after_cleanup_returns_stored_url() {
        let f = fixture(true);
        upload(&f, &[0, 1], 2);
        let first = f.assembler.merge(&hash(), "notes.TXT", 2).await.unwrap();
        let path = f.assembler.artifact_path(&format!("{HASH}.txt")).unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

        let second = f.assembler.merge(&hash(), "notes.TXT", 2).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(std::fs::read(&path).unwrap(), b"aabb");
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
    }

    #[tokio::test]
    async fn completed_without_artifact_or_chunks_fails() {
        let f = fixture(true);
        upload(&f, &[0, 1], 2);
        f.assembler.merge(&hash(), "notes.TXT", 2).await.unwrap();
        let path = f.assembler.artifact_path(&format!("{HASH}.txt")).unwrap();
        std::fs::remove_file(path).unwrap();

        assert!(matches!(
            f.assembler.merge(&hash(), "notes.TXT", 2).await,
            Err(MergeError::Storage(StorageError::ChunkMissing { .. }))
        ));
    }

    #[tokio::test]
    async fn lost_chunk_file_fails_merge() {
        let f = fixture(false);
        upload(&f, &[0, 1], 2);
        f.store.remove_all(&hash()).unwrap();
        assert!(matches!(
            f.assembler.merge(&hash(), "notes.TXT", 2).await,
            Err(MergeError::Storage(StorageError::ChunkMissing { index: 0, .. }))
        ));
        let leftovers: Vec<_> = std::fs::read_dir(f.assembler.artifact_dir())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn artifact_path_rejects_traversal() {
        let f = fixture(false);
        assert!(f.assembler.artifact_path("../chunks").is_err());
    }
}
