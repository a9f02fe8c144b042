use std::io::Write;
use std::path::{Path, PathBuf};

use tessera_protocol::ContentHash;
use tracing::debug;

use crate::StorageError;

/// Raw chunk bytes keyed by `(hash, index)`.
///
/// Calls block on disk I/O; async callers wrap them in `spawn_blocking`.
pub trait ChunkStore: Send + Sync {
    /// Stores (or overwrites) one chunk.
    fn put(&self, hash: &ContentHash, index: u32, data: &[u8]) -> Result<(), StorageError>;

    /// Reads one chunk. Fails with [`StorageError::ChunkMissing`] if absent.
    fn get(&self, hash: &ContentHash, index: u32) -> Result<Vec<u8>, StorageError>;

    /// Deletes every chunk of `hash`. Absent hashes are not an error.
    fn remove_all(&self, hash: &ContentHash) -> Result<(), StorageError>;
}

/// Chunk store laid out as `<root>/<hash>/<index>`.
pub struct DiskChunkStore {
    root: PathBuf,
}

impl DiskChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    fn chunk_path(&self, hash: &ContentHash, index: u32) -> PathBuf {
        self.dir(hash).join(index.to_string())
    }
}

impl ChunkStore for DiskChunkStore {
    fn put(&self, hash: &ContentHash, index: u32, data: &[u8]) -> Result<(), StorageError> {
        let dir = self.dir(hash);
        std::fs::create_dir_all(&dir)?;

        // Unique temp name so concurrent re-uploads of one index never share a file.
        let tmp = dir.join(format!(".{index}.{}.tmp", uuid::Uuid::new_v4()));
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            std::fs::rename(&tmp, self.chunk_path(hash, index))
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(hash = %hash, index, bytes = data.len(), "chunk stored");
        Ok(())
    }

    fn get(&self, hash: &ContentHash, index: u32) -> Result<Vec<u8>, StorageError> {
        match std::fs::read(self.chunk_path(hash, index)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::ChunkMissing {
                hash: hash.to_string(),
                index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_all(&self, hash: &ContentHash) -> Result<(), StorageError> {
        match std::fs::remove_dir_all(self.dir(hash)) {
            Ok(()) => {
                debug!(hash = %hash, "chunks removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash() -> ContentHash {
        ContentHash::parse("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = DiskChunkStore::new(tmp.path().join("chunks")).unwrap();
        store.put(&hash(), 2, b"CCDD").unwrap();
        assert_eq!(store.get(&hash(), 2).unwrap(), b"CCDD");
        assert!(tmp.path().join("chunks").join(hash().as_str()).join("2").exists());
    }

    #[test]
    fn put_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = DiskChunkStore::new(tmp.path()).unwrap();
        store.put(&hash(), 0, b"old").unwrap();
        store.put(&hash(), 0, b"new!").unwrap();
        assert_eq!(store.get(&hash(), 0).unwrap(), b"new!");
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = DiskChunkStore::new(tmp.path()).unwrap();
        store.put(&hash(), 0, b"data").unwrap();
        let names: Vec<_> = std::fs::read_dir(tmp.path().join(hash().as_str()))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["0".to_string()]);
    }

    #[test]
    fn get_missing_chunk() {
        let tmp = TempDir::new().unwrap();
        let store = DiskChunkStore::new(tmp.path()).unwrap();
        assert!(matches!(
            store.get(&hash(), 7),
            Err(StorageError::ChunkMissing { index: 7, .. })
        ));
    }

    #[test]
    fn remove_all_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = DiskChunkStore::new(tmp.path()).unwrap();
        store.put(&hash(), 0, b"a").unwrap();
        store.put(&hash(), 1, b"b").unwrap();
        store.remove_all(&hash()).unwrap();
        assert!(store.get(&hash(), 0).is_err());
        store.remove_all(&hash()).unwrap();
    }
}
