use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tessera_protocol::ContentHash;
use tracing::{debug, info};

use crate::record::{check_recorded, missing_indices};
use crate::{
    ChunkMeta, ExistsResult, FileRecord, FileRegistry, FileState, RegisterOutcome, RegistryError,
};

const CREATE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS files (
    hash TEXT PRIMARY KEY NOT NULL,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL,
    mime_type TEXT,
    total_chunks INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('uploading', 'completed')),
    url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((status = 'completed') = (url IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS file_chunks (
    hash TEXT NOT NULL REFERENCES files(hash) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    PRIMARY KEY (hash, chunk_index)
);
";

/// SQLite-backed registry.
///
/// The uploaded set lives in `file_chunks` keyed by `(hash, chunk_index)`,
/// so concurrent registrations never overwrite each other.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.execute_batch(CREATE_SCHEMA)?;
        info!(path = %path.display(), "sqlite registry opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(CREATE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::Poisoned)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_i64(value: u64) -> Result<i64, RegistryError> {
    i64::try_from(value).map_err(|_| RegistryError::InvalidMeta(format!("{value} too large")))
}

struct Row {
    filename: String,
    size: i64,
    mime_type: Option<String>,
    total_chunks: i64,
    status: String,
    url: Option<String>,
    created_at: String,
    updated_at: String,
}

fn load_row(conn: &Connection, hash: &ContentHash) -> Result<Option<Row>, RegistryError> {
    let row = conn
        .query_row(
            "SELECT filename, size, mime_type, total_chunks, status, url, created_at, updated_at
             FROM files WHERE hash = ?1",
            params![hash.as_str()],
            |r| {
                Ok(Row {
                    filename: r.get(0)?,
                    size: r.get(1)?,
                    mime_type: r.get(2)?,
                    total_chunks: r.get(3)?,
                    status: r.get(4)?,
                    url: r.get(5)?,
                    created_at: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn load_chunks(conn: &Connection, hash: &ContentHash) -> Result<BTreeSet<u32>, RegistryError> {
    let mut stmt = conn.prepare_cached("SELECT chunk_index FROM file_chunks WHERE hash = ?1")?;
    let rows = stmt.query_map(params![hash.as_str()], |r| r.get::<_, u32>(0))?;
    let mut set = BTreeSet::new();
    for index in rows {
        set.insert(index?);
    }
    Ok(set)
}

fn corrupt(hash: &ContentHash, reason: impl Into<String>) -> RegistryError {
    RegistryError::Corrupt {
        hash: hash.to_string(),
        reason: reason.into(),
    }
}

fn parse_time(hash: &ContentHash, raw: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(hash, format!("timestamp {raw:?}: {e}")))
}

impl Row {
    fn total_chunks(&self, hash: &ContentHash) -> Result<u32, RegistryError> {
        u32::try_from(self.total_chunks).map_err(|_| corrupt(hash, "total_chunks out of range"))
    }

    fn size(&self, hash: &ContentHash) -> Result<u64, RegistryError> {
        u64::try_from(self.size).map_err(|_| corrupt(hash, "negative size"))
    }

    fn state(&self, hash: &ContentHash) -> Result<FileState, RegistryError> {
        match (self.status.as_str(), &self.url) {
            ("uploading", None) => Ok(FileState::Uploading),
            ("completed", Some(url)) => Ok(FileState::Completed { url: url.clone() }),
            (status, _) => Err(corrupt(hash, format!("status {status:?}"))),
        }
    }

    fn into_record(
        self,
        hash: &ContentHash,
        uploaded: BTreeSet<u32>,
    ) -> Result<FileRecord, RegistryError> {
        Ok(FileRecord {
            hash: hash.clone(),
            size: self.size(hash)?,
            total_chunks: self.total_chunks(hash)?,
            state: self.state(hash)?,
            created_at: parse_time(hash, &self.created_at)?,
            updated_at: parse_time(hash, &self.updated_at)?,
            filename: self.filename,
            mime_type: self.mime_type,
            uploaded,
        })
    }
}

fn register_in(
    tx: &Transaction<'_>,
    hash: &ContentHash,
    index: u32,
    meta: &ChunkMeta,
) -> Result<RegisterOutcome, RegistryError> {
    match load_row(tx, hash)? {
        Some(row) => {
            check_recorded(row.total_chunks(hash)?, row.size(hash)?, meta)?;
            meta.check_index(index)?;
        }
        None => {
            meta.check_index(index)?;
            let ts = now();
            tx.execute(
                "INSERT INTO files
                 (hash, filename, size, mime_type, total_chunks, status, url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'uploading', NULL, ?6, ?6)",
                params![
                    hash.as_str(),
                    meta.filename,
                    to_i64(meta.size)?,
                    meta.mime_type,
                    meta.total_chunks,
                    ts,
                ],
            )?;
            debug!(hash = %hash, total = meta.total_chunks, "upload record created");
        }
    }

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO file_chunks (hash, chunk_index) VALUES (?1, ?2)",
        params![hash.as_str(), index],
    )?;
    if inserted == 0 {
        return Ok(RegisterOutcome::AlreadyPresent);
    }
    tx.execute(
        "UPDATE files SET updated_at = ?2 WHERE hash = ?1",
        params![hash.as_str(), now()],
    )?;
    Ok(RegisterOutcome::Added)
}

impl FileRegistry for SqliteRegistry {
    fn check_exists(
        &self,
        hash: &ContentHash,
        filename: &str,
        size: u64,
    ) -> Result<ExistsResult, RegistryError> {
        debug!(hash = %hash, filename, size, "dedup check");
        let conn = self.lock()?;
        let url: Option<Option<String>> = conn
            .query_row(
                "SELECT url FROM files WHERE hash = ?1 AND status = 'completed'",
                params![hash.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(match url.flatten() {
            Some(url) => ExistsResult {
                exists: true,
                url: Some(url),
            },
            None => ExistsResult {
                exists: false,
                url: None,
            },
        })
    }

    fn uploaded_chunks(&self, hash: &ContentHash) -> Result<BTreeSet<u32>, RegistryError> {
        let conn = self.lock()?;
        load_chunks(&conn, hash)
    }

    fn register_chunk(
        &self,
        hash: &ContentHash,
        index: u32,
        meta: &ChunkMeta,
    ) -> Result<RegisterOutcome, RegistryError> {
        meta.validate()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = register_in(&tx, hash, index, meta)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn mark_completed(&self, hash: &ContentHash, url: &str) -> Result<String, RegistryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row = load_row(&tx, hash)?.ok_or_else(|| RegistryError::NotFound(hash.clone()))?;
        if let FileState::Completed { url } = row.state(hash)? {
            return Ok(url);
        }
        let uploaded = load_chunks(&tx, hash)?;
        let missing = missing_indices(row.total_chunks(hash)?, &uploaded);
        if !missing.is_empty() {
            return Err(RegistryError::Incomplete { missing });
        }
        tx.execute(
            "UPDATE files SET status = 'completed', url = ?2, updated_at = ?3 WHERE hash = ?1",
            params![hash.as_str(), url, now()],
        )?;
        tx.commit()?;
        Ok(url.to_string())
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<FileRecord>, RegistryError> {
        let conn = self.lock()?;
        let Some(row) = load_row(&conn, hash)? else {
            return Ok(None);
        };
        let uploaded = load_chunks(&conn, hash)?;
        row.into_record(hash, uploaded).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{exercise_registry, exercise_validation, hash, meta};
    use tempfile::TempDir;

    #[test]
    fn shared_behaviour() {
        exercise_registry(&SqliteRegistry::open_in_memory().unwrap());
    }

    #[test]
    fn shared_validation() {
        exercise_validation(&SqliteRegistry::open_in_memory().unwrap());
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.db");
        {
            let reg = SqliteRegistry::open(&path).unwrap();
            reg.register_chunk(&hash(), 0, &meta(2)).unwrap();
            reg.register_chunk(&hash(), 1, &meta(2)).unwrap();
            reg.mark_completed(&hash(), "/uploads/a.jpg").unwrap();
        }
        let reg = SqliteRegistry::open(&path).unwrap();
        let rec = reg.get(&hash()).unwrap().unwrap();
        assert_eq!(rec.url(), Some("/uploads/a.jpg"));
        assert_eq!(rec.uploaded.len(), 2);
        assert_eq!(rec.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn concurrent_registrations_all_land() {
        let tmp = TempDir::new().unwrap();
        let reg = Arc::new(SqliteRegistry::open(&tmp.path().join("r.db")).unwrap());
        let total = 32;
        let handles: Vec<_> = (0..total)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.register_chunk(&hash(), i, &meta(total)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.uploaded_chunks(&hash()).unwrap().len(), total as usize);
    }
}
