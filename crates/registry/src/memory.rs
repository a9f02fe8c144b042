use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_protocol::ContentHash;
use tracing::debug;

use crate::{
    ChunkMeta, ExistsResult, FileRecord, FileRegistry, RegisterOutcome, RegistryError,
};

/// In-process registry. State is lost on restart.
///
/// Every mutation happens under a single write guard, so concurrent
/// registrations for the same hash are serialized.
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<ContentHash, FileRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ContentHash, FileRecord>>, RegistryError> {
        self.records.read().map_err(|_| RegistryError::Poisoned)
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<ContentHash, FileRecord>>, RegistryError> {
        self.records.write().map_err(|_| RegistryError::Poisoned)
    }
}

impl FileRegistry for MemoryRegistry {
    fn check_exists(
        &self,
        hash: &ContentHash,
        filename: &str,
        size: u64,
    ) -> Result<ExistsResult, RegistryError> {
        debug!(hash = %hash, filename, size, "dedup check");
        let records = self.read()?;
        Ok(ExistsResult::from_record(records.get(hash)))
    }

    fn uploaded_chunks(&self, hash: &ContentHash) -> Result<BTreeSet<u32>, RegistryError> {
        let records = self.read()?;
        Ok(records
            .get(hash)
            .map(|r| r.uploaded.clone())
            .unwrap_or_default())
    }

    fn register_chunk(
        &self,
        hash: &ContentHash,
        index: u32,
        meta: &ChunkMeta,
    ) -> Result<RegisterOutcome, RegistryError> {
        meta.validate()?;
        let mut records = self.write()?;
        match records.get_mut(hash) {
            Some(record) => {
                record.check_meta(meta)?;
                record.add_chunk(index)
            }
            None => {
                meta.check_index(index)?;
                let mut record = FileRecord::new(hash.clone(), meta);
                let outcome = record.add_chunk(index)?;
                records.insert(hash.clone(), record);
                debug!(hash = %hash, total = meta.total_chunks, "upload record created");
                Ok(outcome)
            }
        }
    }

    fn mark_completed(&self, hash: &ContentHash, url: &str) -> Result<String, RegistryError> {
        let mut records = self.write()?;
        let record = records
            .get_mut(hash)
            .ok_or_else(|| RegistryError::NotFound(hash.clone()))?;
        record.complete(url)
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<FileRecord>, RegistryError> {
        Ok(self.read()?.get(hash).cloned())
    }
}
