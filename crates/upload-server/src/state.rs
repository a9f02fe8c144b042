use std::path::Path;
use std::sync::Arc;

use tessera_protocol::ContentHash;
use tessera_registry::{FileRegistry, MemoryRegistry, SqliteRegistry};
use tessera_storage::{ChunkStore, DiskChunkStore, MergeAssembler};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ServerError;

/// Services shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn FileRegistry>,
    pub store: Arc<dyn ChunkStore>,
    pub assembler: Arc<MergeAssembler>,
    pub(crate) creation_locks: Arc<CreationLocks>,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn FileRegistry>,
        store: Arc<dyn ChunkStore>,
        assembler: Arc<MergeAssembler>,
    ) -> Self {
        Self {
            registry,
            store,
            assembler,
            creation_locks: Arc::new(CreationLocks::new()),
        }
    }

    /// Standard on-disk layout under `data_dir`:
    /// `chunks/` for uploaded chunks, `files/` for artifacts and
    /// `registry.db` when `durable` is set.
    pub fn open(
        data_dir: &Path,
        durable: bool,
        public_base_url: &str,
        cleanup_chunks: bool,
    ) -> Result<Self, ServerError> {
        std::fs::create_dir_all(data_dir)?;
        let registry: Arc<dyn FileRegistry> = if durable {
            Arc::new(SqliteRegistry::open(&data_dir.join("registry.db"))?)
        } else {
            Arc::new(MemoryRegistry::new())
        };
        let store: Arc<dyn ChunkStore> = Arc::new(DiskChunkStore::new(data_dir.join("chunks"))?);
        let assembler = MergeAssembler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            data_dir.join("files"),
            public_base_url,
        )?
        .with_cleanup(cleanup_chunks);
        Ok(Self::new(registry, store, Arc::new(assembler)))
    }
}

const CREATION_STRIPES: usize = 64;

/// Striped locks held while a chunk may create its hash's record.
///
/// Holding the stripe across check, store and register means only the
/// request that creates the record writes bytes under its metadata.
pub(crate) struct CreationLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl CreationLocks {
    fn new() -> Self {
        Self {
            stripes: (0..CREATION_STRIPES)
                .map(|_| Arc::new(Mutex::new(())))
                .collect(),
        }
    }

    pub(crate) async fn lock(&self, hash: &ContentHash) -> OwnedMutexGuard<()> {
        let slot = hash
            .as_str()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
        Arc::clone(&self.stripes[slot % self.stripes.len()])
            .lock_owned()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_hash_shares_a_stripe() {
        let locks = CreationLocks::new();
        let hash = ContentHash::parse("0123456789abcdef0123456789abcdef").unwrap();
        let guard = locks.lock(&hash).await;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.lock(&hash),
        )
        .await;
        assert!(second.is_err());
        drop(guard);
        let _again = locks.lock(&hash).await;
    }
}
