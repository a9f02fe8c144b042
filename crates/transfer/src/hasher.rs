//! Streaming content hasher.
//!
//! The digest is stateful across chunks, so bytes must be fed strictly in
//! index order. Hashing runs on a dedicated blocking task that only talks to
//! its owner through two channels:
//!
//! ```text
//! owner  --Append(bytes)--> worker --Progress--> owner   (once per chunk)
//! owner  --Complete------>  worker --Finished--> owner   (terminal)
//! ```
//!
//! Dropping the command sender terminates the worker without a result.

use std::path::Path;

use md5::{Digest, Md5};
use tessera_protocol::ContentHash;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ChunkPlan, TransferError};

/// Incremental MD5 over a file's bytes.
pub struct Md5Hasher {
    inner: Md5,
    processed: u64,
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5Hasher {
    pub fn new() -> Self {
        Self {
            inner: Md5::new(),
            processed: 0,
        }
    }

    /// Appends the next chunk.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.processed += data.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Finalizes the digest. Consumes the hasher.
    pub fn finish(self) -> Result<ContentHash, TransferError> {
        Ok(ContentHash::parse(&hex::encode(self.inner.finalize()))?)
    }
}

/// Content hash of an in-memory buffer.
pub fn content_hash_bytes(data: &[u8]) -> Result<ContentHash, TransferError> {
    let mut hasher = Md5Hasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Hashing progress after a chunk has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashProgress {
    pub processed: u64,
    pub total: u64,
    /// `floor(processed / total * 100)`, clamped to 100.
    pub percent: u8,
}

impl HashProgress {
    pub fn new(processed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((processed as u128 * 100) / total as u128).min(100) as u8
        };
        Self {
            processed,
            total,
            percent,
        }
    }
}

enum HashCommand {
    Append(Vec<u8>),
    Complete,
}

/// Event emitted by the hash worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashEvent {
    Progress(HashProgress),
    Finished(ContentHash),
    Failed(String),
}

/// Handle to a hashing task running off the async executor.
pub struct HashWorker {
    commands: mpsc::Sender<HashCommand>,
    events: mpsc::Receiver<HashEvent>,
}

impl HashWorker {
    /// Starts a worker for a file of `total_bytes`.
    pub fn spawn(total_bytes: u64) -> Self {
        let (commands, mut command_rx) = mpsc::channel::<HashCommand>(1);
        let (event_tx, events) = mpsc::channel(4);

        tokio::task::spawn_blocking(move || {
            let mut hasher = Md5Hasher::new();
            while let Some(cmd) = command_rx.blocking_recv() {
                match cmd {
                    HashCommand::Append(bytes) => {
                        hasher.update(&bytes);
                        let progress = HashProgress::new(hasher.processed(), total_bytes);
                        if event_tx.blocking_send(HashEvent::Progress(progress)).is_err() {
                            return;
                        }
                    }
                    HashCommand::Complete => {
                        let event = match hasher.finish() {
                            Ok(hash) => HashEvent::Finished(hash),
                            Err(e) => HashEvent::Failed(e.to_string()),
                        };
                        let _ = event_tx.blocking_send(event);
                        return;
                    }
                }
            }
            debug!("hash worker terminated before completion");
        });

        Self { commands, events }
    }

    /// Feeds the next chunk and waits for its progress acknowledgement.
    pub async fn append(&mut self, bytes: Vec<u8>) -> Result<HashProgress, TransferError> {
        self.commands
            .send(HashCommand::Append(bytes))
            .await
            .map_err(|_| TransferError::HasherClosed)?;
        match self.events.recv().await {
            Some(HashEvent::Progress(p)) => Ok(p),
            Some(HashEvent::Failed(msg)) => Err(TransferError::HashFailed(msg)),
            _ => Err(TransferError::HasherClosed),
        }
    }

    /// Finalizes the digest and stops the worker.
    pub async fn complete(mut self) -> Result<ContentHash, TransferError> {
        self.commands
            .send(HashCommand::Complete)
            .await
            .map_err(|_| TransferError::HasherClosed)?;
        match self.events.recv().await {
            Some(HashEvent::Finished(hash)) => Ok(hash),
            Some(HashEvent::Failed(msg)) => Err(TransferError::HashFailed(msg)),
            _ => Err(TransferError::HasherClosed),
        }
    }

    /// Stops the worker without producing a hash.
    pub fn abort(self) {
        drop(self.commands);
    }
}

/// Hashes the file at `path` chunk by chunk following `plan`.
///
/// Chunks are read sequentially on the caller's task and handed to a
/// [`HashWorker`]. Progress is forwarded to `progress_tx` when given. Any
/// read error or cancellation aborts the worker; no partial hash is returned.
pub async fn hash_file(
    path: &Path,
    plan: &ChunkPlan,
    progress_tx: Option<&mpsc::Sender<HashProgress>>,
    cancel: &CancellationToken,
) -> Result<ContentHash, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut worker = HashWorker::spawn(plan.file_size());

    for (index, range) in plan.ranges() {
        if cancel.is_cancelled() {
            worker.abort();
            return Err(TransferError::Cancelled);
        }

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        if let Err(e) = file.read_exact(&mut buf).await {
            worker.abort();
            debug!(index, "chunk read failed while hashing: {e}");
            return Err(e.into());
        }

        let progress = worker.append(buf).await?;
        if let Some(tx) = progress_tx {
            let _ = tx.send(progress).await;
        }
    }

    worker.complete().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // MD5("The quick brown fox jumps over the lazy dog")
    const FOX: &[u8] = b"The quick brown fox jumps over the lazy dog";
    const FOX_MD5: &str = "9e107d9d372bb6826bd81d3542a419d6";

    #[test]
    fn one_shot_matches_known_digest() {
        assert_eq!(content_hash_bytes(FOX).unwrap().as_str(), FOX_MD5);
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut h = Md5Hasher::new();
        for part in FOX.chunks(7) {
            h.update(part);
        }
        assert_eq!(h.processed(), FOX.len() as u64);
        assert_eq!(h.finish().unwrap().as_str(), FOX_MD5);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(HashProgress::new(50, 200).percent, 25);
        assert_eq!(HashProgress::new(300, 200).percent, 100);
        assert_eq!(HashProgress::new(0, 0).percent, 100);
        assert_eq!(HashProgress::new(199, 200).percent, 99);
    }

    #[tokio::test]
    async fn worker_hashes_in_order() {
        let mut worker = HashWorker::spawn(FOX.len() as u64);
        let mut last = 0;
        for part in FOX.chunks(10) {
            let p = worker.append(part.to_vec()).await.unwrap();
            assert!(p.percent >= last);
            last = p.percent;
        }
        assert_eq!(last, 100);
        assert_eq!(worker.complete().await.unwrap().as_str(), FOX_MD5);
    }

    #[tokio::test]
    async fn hash_file_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fox.txt");
        std::fs::File::create(&path).unwrap().write_all(FOX).unwrap();

        let plan = ChunkPlan::new(FOX.len() as u64, 8).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let hash = hash_file(&path, &plan, Some(&tx), &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        assert_eq!(hash.as_str(), FOX_MD5);

        let mut events = Vec::new();
        while let Some(p) = rx.recv().await {
            events.push(p);
        }
        assert_eq!(events.len(), plan.count() as usize);
        assert_eq!(events.last().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn hash_file_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fox.txt");
        std::fs::write(&path, FOX).unwrap();

        let plan = ChunkPlan::new(FOX.len() as u64, 8).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = hash_file(&path, &plan, None, &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn hash_file_fails_when_file_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"1234").unwrap();

        // Plan claims more bytes than the file holds.
        let plan = ChunkPlan::new(16, 4).unwrap();
        let result = hash_file(&path, &plan, None, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}
