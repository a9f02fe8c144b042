//! Upload orchestration.
//!
//! One call to [`UploadCoordinator::upload`] runs the whole pipeline for a
//! file:
//!
//! 1. Hash the file chunk by chunk (progress reported as it goes).
//! 2. Dedup check; an existing completed file returns immediately.
//! 3. Resume query; only chunks the server lacks are scheduled.
//! 4. Dispatch chunks with at most `max_concurrency` in flight, each retried
//!    on its own.
//! 5. Merge.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tessera_protocol::{CheckRequest, ContentHash, MergeRequest};
use tessera_transfer::{
    ChunkPlan, ChunkReader, DEFAULT_CHUNK_SIZE, HashProgress, checksum_bytes, hash_file,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ChunkUpload, RetryPolicy, UploadApi, UploadError};

/// Default number of chunks in flight.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Per-upload settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Sent with every chunk when set.
    pub mime_type: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            mime_type: None,
        }
    }
}

/// Progress reported while an upload runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Hashing(HashProgress),
    Hashed(ContentHash),
    /// Resume state: `already` of `total` chunks were on the server.
    Resumed { already: usize, total: u32 },
    ChunkUploaded { index: u32, done: u32, total: u32 },
    ChunkRetry { index: u32, attempt: u32, error: String },
    Merging,
    Completed { url: String },
}

/// How an upload finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server already had the file; nothing was sent.
    Instant { hash: ContentHash, url: String },
    Uploaded {
        hash: ContentHash,
        url: String,
        chunks_sent: u32,
        width: Option<u32>,
        height: Option<u32>,
    },
}

impl UploadOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Instant { url, .. } | Self::Uploaded { url, .. } => url,
        }
    }

    pub fn hash(&self) -> &ContentHash {
        match self {
            Self::Instant { hash, .. } | Self::Uploaded { hash, .. } => hash,
        }
    }
}

/// Drives uploads against an [`UploadApi`].
pub struct UploadCoordinator<A: UploadApi + 'static> {
    api: Arc<A>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl<A: UploadApi + 'static> UploadCoordinator<A> {
    pub fn new(api: Arc<A>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            api,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Token that stops scheduling new chunks when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: UploadEvent) {
        // Events are best-effort; nobody listening is fine.
        let _ = self.events_tx.try_send(event);
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Uploads the file at `path`.
    pub async fn upload(&self, path: &Path) -> Result<UploadOutcome, UploadError> {
        let size = tokio::fs::metadata(path).await?.len();
        if size == 0 {
            return Err(UploadError::EmptyFile);
        }
        let plan = ChunkPlan::new(size, self.config.chunk_size)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        // 1. Hash.
        let hash = self.hash(path, &plan).await?;
        self.emit(UploadEvent::Hashed(hash.clone()));
        self.check_cancelled()?;

        // 2. Dedup.
        let check = self
            .api
            .check(&CheckRequest {
                hash: hash.to_string(),
                filename: filename.clone(),
                size,
            })
            .await?;
        if let (true, Some(url)) = (check.exists, check.url) {
            info!(hash = %hash, url = %url, "file already on server");
            self.emit(UploadEvent::Completed { url: url.clone() });
            return Ok(UploadOutcome::Instant { hash, url });
        }

        // 3. Resume.
        let uploaded: BTreeSet<u32> = self.api.uploaded_chunks(&hash).await?.into_iter().collect();
        let pending: Vec<u32> = (0..plan.count()).filter(|i| !uploaded.contains(i)).collect();
        let already = plan.count() as usize - pending.len();
        debug!(hash = %hash, already, pending = pending.len(), "resume state");
        self.emit(UploadEvent::Resumed {
            already,
            total: plan.count(),
        });

        // 4. Chunks.
        let chunks_sent = pending.len() as u32;
        self.dispatch(path, &hash, &filename, &plan, pending).await?;

        // 5. Merge.
        self.check_cancelled()?;
        self.emit(UploadEvent::Merging);
        let merged = self
            .api
            .merge(&MergeRequest {
                hash: hash.to_string(),
                filename,
                total_chunks: plan.count(),
            })
            .await?;
        info!(hash = %hash, url = %merged.url, chunks_sent, "upload complete");
        self.emit(UploadEvent::Completed {
            url: merged.url.clone(),
        });

        Ok(UploadOutcome::Uploaded {
            hash,
            url: merged.url,
            chunks_sent,
            width: merged.width,
            height: merged.height,
        })
    }

    async fn hash(&self, path: &Path, plan: &ChunkPlan) -> Result<ContentHash, UploadError> {
        let (progress_tx, mut progress_rx) = mpsc::channel::<HashProgress>(16);
        let cancel = &self.cancel;

        let hashing = async move {
            let result = hash_file(path, plan, Some(&progress_tx), cancel).await;
            drop(progress_tx);
            result
        };
        let forward = async {
            while let Some(p) = progress_rx.recv().await {
                self.emit(UploadEvent::Hashing(p));
            }
        };

        let (result, ()) = tokio::join!(hashing, forward);
        result.map_err(|e| match e {
            tessera_transfer::TransferError::Cancelled => UploadError::Cancelled,
            e => e.into(),
        })
    }

    async fn dispatch(
        &self,
        path: &Path,
        hash: &ContentHash,
        filename: &str,
        plan: &ChunkPlan,
        pending: Vec<u32>,
    ) -> Result<(), UploadError> {
        if pending.is_empty() {
            return Ok(());
        }

        let total = plan.count();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<Result<u32, UploadError>> = JoinSet::new();
        let mut queue = pending.into_iter();
        let mut done = total - queue.len() as u32;

        loop {
            // Fill free slots, then wait for one result.
            while let Some(index) = queue.as_slice().first().copied() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                if self.cancel.is_cancelled() {
                    tasks.abort_all();
                    return Err(UploadError::Cancelled);
                }
                queue.next();

                let job = ChunkJob {
                    api: Arc::clone(&self.api),
                    path: path.to_path_buf(),
                    plan: *plan,
                    template: ChunkUpload {
                        hash: hash.clone(),
                        index,
                        data: Vec::new(),
                        filename: filename.to_string(),
                        size: plan.file_size(),
                        total_chunks: total,
                        mime_type: self.config.mime_type.clone(),
                        checksum: String::new(),
                    },
                    retry: self.config.retry.clone(),
                    events_tx: self.events_tx.clone(),
                };
                tasks.spawn(async move {
                    let result = job.run().await;
                    drop(permit);
                    result
                });
            }

            let joined = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(UploadError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => return Ok(()),
                Some(Ok(Ok(index))) => {
                    done += 1;
                    self.emit(UploadEvent::ChunkUploaded { index, done, total });
                }
                Some(Ok(Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Err(e)) => {
                    tasks.abort_all();
                    return Err(UploadError::Task(e.to_string()));
                }
            }
        }
    }
}

/// Everything a spawned task needs to send one chunk.
struct ChunkJob<A: UploadApi> {
    api: Arc<A>,
    path: std::path::PathBuf,
    plan: ChunkPlan,
    template: ChunkUpload,
    retry: RetryPolicy,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl<A: UploadApi> ChunkJob<A> {
    /// Reads this job's chunk under the plan made at hashing time.
    async fn read(&self) -> Result<Vec<u8>, UploadError> {
        let (path, plan, index) = (self.path.clone(), self.plan, self.template.index);
        let data = tokio::task::spawn_blocking(move || {
            ChunkReader::with_plan(&path, plan)?.read_chunk(index)
        })
        .await
        .map_err(|e| UploadError::Task(e.to_string()))??;
        Ok(data)
    }

    async fn run(self) -> Result<u32, UploadError> {
        let index = self.template.index;
        let data = self.read().await?;
        let mut chunk = self.template.clone();
        chunk.checksum = checksum_bytes(&data);
        chunk.data = data;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.api.upload_chunk(chunk.clone()).await {
                Ok(()) => return Ok(index),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!(index, attempt, "chunk upload failed, retrying: {e}");
                    let _ = self.events_tx.try_send(UploadEvent::ChunkRetry {
                        index,
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(UploadError::ChunkFailed {
                        index,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
